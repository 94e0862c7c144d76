//! Incoming HTTP request handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Collected, LengthLimitError, Limited};
use serde_json::Value;

use crate::body::Body;
use crate::error::{BoxError, Error};
use crate::handler::BoxFuture;

/// Largest body [`Request::bytes`] buffers unless the server says otherwise.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// An incoming HTTP request.
///
/// `Request` is a cheap, cloneable handle: the engine, the request-preparation
/// wrapper and the host handler all look at the same request. The body is
/// drained lazily, at most once, by [`bytes`](Request::bytes) or
/// [`json`](Request::json).
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    method: http::Method,
    path: String,
    original_url: String,
    hostname: String,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body_limit: usize,
    raw: tokio::sync::Mutex<RawBody>,
    parsed: Mutex<Option<Value>>,
}

enum RawBody {
    Pending(Body),
    Buffered(Bytes),
}

impl Request {
    pub(crate) fn new(req: http::Request<Body>, params: HashMap<String, String>, body_limit: usize) -> Self {
        let (parts, body) = req.into_parts();
        let original_url = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());
        let hostname = hostname(&parts.headers, &parts.uri);

        Self {
            inner: Arc::new(Inner {
                path: parts.uri.path().to_owned(),
                method: parts.method,
                original_url,
                hostname,
                headers: parts.headers,
                params,
                body_limit,
                raw: tokio::sync::Mutex::new(RawBody::Pending(body)),
                parsed: Mutex::new(None),
            }),
        }
    }

    pub fn method(&self) -> &http::Method { &self.inner.method }
    pub fn path(&self) -> &str { &self.inner.path }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }

    /// Path plus query string, exactly as requested (`/users?page=2`).
    pub fn original_url(&self) -> &str { &self.inner.original_url }

    /// Host the client addressed, without the port.
    pub fn hostname(&self) -> &str { &self.inner.hostname }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get(key).map(String::as_str)
    }

    /// Drains the body on first call and returns the buffered bytes.
    ///
    /// Bodies larger than the server's limit fail with
    /// [`Error::PayloadTooLarge`] without being buffered past the limit.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        let limit = self.inner.body_limit;
        let mut raw = self.inner.raw.lock().await;
        let bytes = match &mut *raw {
            RawBody::Buffered(bytes) => return Ok(bytes.clone()),
            RawBody::Pending(body) => {
                let body = std::mem::replace(body, crate::body::empty());
                let collect: BoxFuture<Result<Collected<Bytes>, BoxError>> = Box::pin(Limited::new(body, limit).collect());
                match collect.await {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) if err.is::<LengthLimitError>() => return Err(Error::PayloadTooLarge(limit)),
                    Err(err) => return Err(Error::Body(err)),
                }
            }
        };
        *raw = RawBody::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Reads the body as JSON. An empty body yields an empty object.
    pub async fn json(&self) -> Result<Value, Error> {
        let bytes = self.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The parsed body attached by [`set_body`](Request::set_body), if any.
    pub fn body(&self) -> Option<Value> {
        self.inner.parsed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_body(&self, value: Value) {
        *self.inner.parsed.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

/// `Host` header first (HTTP/1.1), URI authority second (HTTP/2).
fn hostname(headers: &HeaderMap, uri: &http::Uri) -> String {
    let host = headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or_default();

    // [::1]:8080 → [::1]
    if host.starts_with('[') {
        return host.split_inclusive(']').next().unwrap_or(host).to_owned();
    }
    host.split(':').next().unwrap_or(host).to_owned()
}

#[cfg(test)]
pub(crate) fn test_request(method: http::Method, uri: &str, body: &'static str) -> Request {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::HOST, "api.example.com:3000")
        .body(crate::body::full(body))
        .unwrap();
    Request::new(req, HashMap::new(), DEFAULT_BODY_LIMIT)
}
