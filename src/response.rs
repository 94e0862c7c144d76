//! Outgoing HTTP response handle.
//!
//! A [`Response`] is a shared, mutable handle rather than a value returned
//! from the handler: the handler (or the adapter on its behalf) sets a status
//! and headers, then issues exactly one terminal write (`send`, `json`,
//! `html`, `redirect`, `end`, `stream`). The terminal write hands a finished
//! `http::Response` to the connection task through a oneshot channel.
//!
//! # Atomic scope
//!
//! Inside [`Response::atomic`] terminal writes are buffered: status and
//! header changes made after the write but before the scope ends still land
//! in the response, and nothing reaches hyper until the scope completes.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::Stream;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::body::{self, Body};
use crate::error::{BoxError, Error};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values the engine writes on its own.
pub enum ContentType {
    Html, // text/html; charset=utf-8
    Json, // application/json
    Text, // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust,ignore
/// async fn create_user(_req: Request, res: Response) -> Result<(), Error> {
///     res.status(StatusCode::CREATED)
///         .set_header("location", "/users/42")?;
///     res.json(&serde_json::json!({ "id": 42 }))
/// }
/// ```
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<State>>,
}

struct State {
    status: StatusCode,
    headers: HeaderMap,
    atomic_depth: usize,
    /// Body of the terminal write, waiting for the atomic scope to end.
    pending: Option<Body>,
    finished: bool,
    headers_sent: bool,
    tx: Option<oneshot::Sender<http::Response<Body>>>,
}

/// Receiving half of a response: resolves once the response is flushed.
pub(crate) struct PendingResponse(oneshot::Receiver<http::Response<Body>>);

impl PendingResponse {
    pub(crate) async fn recv(self) -> Result<http::Response<Body>, Error> {
        self.0.await.map_err(|_| Error::HandlerDropped)
    }

    #[cfg(test)]
    pub(crate) fn is_flushed(&mut self) -> bool {
        !matches!(self.0.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

impl Response {
    pub(crate) fn channel() -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let state = State {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            atomic_depth: 0,
            pending: None,
            finished: false,
            headers_sent: false,
            tx: Some(tx),
        };
        (Self { inner: Arc::new(Mutex::new(state)) }, PendingResponse(rx))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Status and headers ───────────────────────────────────────────────────

    /// Sets the status code. Ignored once headers are sent.
    pub fn status(&self, code: StatusCode) -> &Self {
        let mut state = self.state();
        if state.headers_sent {
            debug!(%code, "status change after headers were sent, ignored");
        } else {
            state.status = code;
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.state().status
    }

    /// Sets a header, replacing any previous value (names are case-insensitive).
    pub fn set_header(&self, name: &str, value: &str) -> Result<&Self, Error> {
        let (name, value) = header_pair(name, value)?;
        let mut state = self.state();
        if state.headers_sent {
            debug!(header = %name, "header change after headers were sent, ignored");
        } else {
            state.headers.insert(name, value);
        }
        Ok(self)
    }

    /// Sets a header only if it is not already present.
    pub fn fill_header(&self, name: &str, value: &str) -> Result<&Self, Error> {
        let (name, value) = header_pair(name, value)?;
        let mut state = self.state();
        if !state.headers_sent && !state.headers.contains_key(&name) {
            state.headers.insert(name, value);
        }
        Ok(self)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<String> {
        self.state()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// `true` once the response has been handed to the connection.
    pub fn headers_sent(&self) -> bool {
        self.state().headers_sent
    }

    /// `true` once a terminal write has been issued (it may still be buffered
    /// by an atomic scope).
    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    // ── Terminal writes ──────────────────────────────────────────────────────

    /// Sends raw bytes as the body. No content type is added.
    pub fn send(&self, body: impl Into<Bytes>) {
        self.finish(body::full(body));
    }

    /// Ends the response, optionally with a raw message.
    pub fn end(&self, message: Option<&str>) {
        match message {
            Some(message) => self.finish(body::full(message.to_owned())),
            None => self.finish(body::empty()),
        }
    }

    /// Serialises `value` as the body; `content-type` defaults to JSON.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.fill_content_type(ContentType::Json);
        self.finish(body::full(bytes));
        Ok(())
    }

    /// Sends markup; `content-type` defaults to HTML.
    pub fn html(&self, markup: impl Into<String>) {
        self.fill_content_type(ContentType::Html);
        self.finish(body::full(markup.into()));
    }

    /// Redirects to `location`. Uses `302 Found` unless a 3xx status was set.
    pub fn redirect(&self, location: &str) -> Result<(), Error> {
        self.set_header(LOCATION.as_str(), location)?;
        {
            let mut state = self.state();
            if !state.headers_sent && !state.status.is_redirection() {
                state.status = StatusCode::FOUND;
            }
        }
        self.finish(body::empty());
        Ok(())
    }

    /// Pipes `stream` to the client as the body.
    pub fn stream<S, E>(&self, stream: S)
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.finish(body::from_stream(stream));
    }

    // ── Atomic scope ─────────────────────────────────────────────────────────

    /// Runs `fut` with terminal writes buffered until it completes.
    ///
    /// Scopes nest; the response is flushed when the outermost one ends,
    /// even if `fut` is dropped before completion.
    pub async fn atomic<F: Future>(&self, fut: F) -> F::Output {
        self.state().atomic_depth += 1;
        let _scope = AtomicScope(self);
        fut.await
    }

    pub(crate) fn fill_content_type(&self, content_type: ContentType) {
        let mut state = self.state();
        if !state.headers_sent && !state.headers.contains_key(CONTENT_TYPE) {
            state.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }
    }

    fn finish(&self, body: Body) {
        let mut state = self.state();
        if state.finished {
            debug!("response already finished, write ignored");
            return;
        }
        state.finished = true;
        state.pending = Some(body);
        if state.atomic_depth == 0 {
            flush(&mut state);
        }
    }
}

struct AtomicScope<'a>(&'a Response);

impl Drop for AtomicScope<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.atomic_depth -= 1;
        if state.atomic_depth == 0 {
            flush(&mut state);
        }
    }
}

fn flush(state: &mut State) {
    let Some(body) = state.pending.take() else { return };

    let mut res = http::Response::new(body);
    *res.status_mut() = state.status;
    *res.headers_mut() = state.headers.clone();
    state.headers_sent = true;

    if let Some(tx) = state.tx.take() {
        // The connection may already be gone; nothing left to deliver to.
        let _ = tx.send(res);
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let name = HeaderName::try_from(name).map_err(|_| Error::InvalidHeader(name.to_owned()))?;
    let value = HeaderValue::try_from(value).map_err(|_| Error::InvalidHeader(name.to_string()))?;
    Ok((name, value))
}

#[cfg(test)]
pub(crate) async fn body_string(res: http::Response<Body>) -> String {
    use http_body_util::BodyExt;
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
