//! Reply shaping: host payloads onto engine responses.
//!
//! The host pipeline hands over a [`ReplyPayload`] and, optionally, a status.
//! [`reply`] turns it into exactly one terminal write while keeping the
//! content headers consistent:
//!
//! - `Content-Type`, `Content-Disposition` and `Content-Length` are only
//!   filled in when absent, never overwritten;
//! - except for error payloads: when a handler already set a non-JSON
//!   `Content-Type` and the payload is a JSON error, the type is forced to
//!   JSON and a warning is logged.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use http::StatusCode;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::Error;
use crate::response::{ContentType, Response};

/// What the host pipeline asks the adapter to send.
pub enum ReplyPayload {
    /// No body at all.
    Empty,
    /// A structured value, serialised as JSON. `error` is set by the producer
    /// when the value describes a failed request.
    Json { value: Value, error: Option<StatusCode> },
    /// Sent as-is, without a content type.
    Raw(String),
    Stream(StreamableFile),
}

impl ReplyPayload {
    /// Serialises `value`; values that serialise to `null` are empty.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(match serde_json::to_value(value)? {
            Value::Null => Self::Empty,
            value => Self::Json { value, error: None },
        })
    }

    /// A JSON error body, e.g. `{"statusCode":404,"message":"Not Found"}`.
    pub fn error(status: StatusCode, value: Value) -> Self {
        Self::Json { value, error: Some(status) }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }

    fn error_status(&self) -> Option<StatusCode> {
        match self {
            Self::Json { error: Some(status), .. }
                if status.is_client_error() || status.is_server_error() =>
            {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// `null` is empty, objects and arrays are JSON, other scalars are raw text.
impl From<Value> for ReplyPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(text) => Self::Raw(text),
            Value::Bool(_) | Value::Number(_) => Self::Raw(value.to_string()),
            Value::Array(_) | Value::Object(_) => Self::Json { value, error: None },
        }
    }
}

impl From<String> for ReplyPayload {
    fn from(text: String) -> Self {
        Self::Raw(text)
    }
}

impl From<&str> for ReplyPayload {
    fn from(text: &str) -> Self {
        Self::Raw(text.to_owned())
    }
}

impl From<StreamableFile> for ReplyPayload {
    fn from(file: StreamableFile) -> Self {
        Self::Stream(file)
    }
}

impl<T: Into<ReplyPayload>> From<Option<T>> for ReplyPayload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

// ── StreamableFile ────────────────────────────────────────────────────────────

type ErrorHook = Arc<dyn Fn(&io::Error) + Send + Sync + 'static>;
type CompletionHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// A byte stream plus the headers that describe it.
///
/// ```rust,ignore
/// let file = tokio::fs::File::open("report.csv").await?;
/// let payload = StreamableFile::new(tokio_util::io::ReaderStream::new(file))
///     .content_type("text/csv")
///     .disposition(r#"attachment; filename="report.csv""#)
///     .length(len);
/// ```
pub struct StreamableFile {
    stream: BoxStream<'static, io::Result<Bytes>>,
    content_type: Option<String>,
    disposition: Option<String>,
    length: Option<u64>,
    on_error: ErrorHook,
    on_complete: CompletionHook,
}

impl StreamableFile {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            content_type: None,
            disposition: None,
            length: None,
            on_error: Arc::new(|err| error!("streamed reply failed: {err}")),
            on_complete: Arc::new(|| {}),
        }
    }

    /// Buffered bytes served through the stream path.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let length = bytes.len() as u64;
        Self::new(futures_util::stream::once(async move { Ok(bytes) })).length(length)
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn disposition(mut self, value: impl Into<String>) -> Self {
        self.disposition = Some(value.into());
        self
    }

    pub fn length(mut self, value: u64) -> Self {
        self.length = Some(value);
        self
    }

    /// Called when the stream yields an error; the body is aborted right after.
    pub fn on_error(mut self, hook: impl Fn(&io::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(hook);
        self
    }

    /// Called once the whole stream was sent without error.
    pub fn on_complete(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Arc::new(hook);
        self
    }
}

impl fmt::Debug for StreamableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableFile")
            .field("content_type", &self.content_type)
            .field("disposition", &self.disposition)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Forwards chunks until the source ends or fails, then runs the matching
/// hook. A source error is passed on after the hook so hyper aborts the body
/// instead of finishing it.
struct Piped {
    source: BoxStream<'static, io::Result<Bytes>>,
    on_error: ErrorHook,
    on_complete: CompletionHook,
    done: bool,
}

impl Stream for Piped {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(self.source.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(err)) => {
                self.done = true;
                (self.on_error)(&err);
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.done = true;
                (self.on_complete)();
                Poll::Ready(None)
            }
        }
    }
}

// ── Shaping ───────────────────────────────────────────────────────────────────

/// Writes `payload` to `response`, setting `status` first when given.
pub fn reply(
    response: &Response,
    payload: impl Into<ReplyPayload>,
    status: Option<StatusCode>,
) -> Result<(), Error> {
    if let Some(status) = status {
        response.status(status);
    }

    let payload = payload.into();
    if let Some(status) = payload.error_status() {
        coerce_error_content_type(response, status)?;
    }

    match payload {
        ReplyPayload::Empty => response.end(None),
        ReplyPayload::Stream(file) => reply_stream(response, file)?,
        ReplyPayload::Json { value, .. } => response.json(&value)?,
        ReplyPayload::Raw(text) => response.send(text),
    }
    Ok(())
}

fn coerce_error_content_type(response: &Response, status: StatusCode) -> Result<(), Error> {
    let Some(current) = response.header(CONTENT_TYPE.as_str()) else {
        return Ok(());
    };
    if current.starts_with(ContentType::Json.as_str()) {
        return Ok(());
    }

    warn!(
        %status,
        content_type = %current,
        "Content-Type doesn't match reply body, a custom error handler may be needed for non-JSON responses"
    );
    response.set_header(CONTENT_TYPE.as_str(), ContentType::Json.as_str())?;
    Ok(())
}

fn reply_stream(response: &Response, file: StreamableFile) -> Result<(), Error> {
    if let Some(content_type) = &file.content_type {
        response.fill_header(CONTENT_TYPE.as_str(), content_type)?;
    }
    if let Some(disposition) = &file.disposition {
        response.fill_header(CONTENT_DISPOSITION.as_str(), disposition)?;
    }
    if let Some(length) = file.length {
        response.fill_header(CONTENT_LENGTH.as_str(), &length.to_string())?;
    }

    response.stream(Piped {
        source: file.stream,
        on_error: file.on_error,
        on_complete: file.on_complete,
        done: false,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::body_string;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Collects formatted log output for the duration of a test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, buffer.contents())
    }

    #[tokio::test]
    async fn empty_reply_has_no_body_and_no_content_type() {
        let (res, pending) = Response::channel();
        reply(&res, ReplyPayload::Empty, None).unwrap();

        let out = pending.recv().await.unwrap();
        assert!(out.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_string(out).await, "");
    }

    #[tokio::test]
    async fn objects_are_json_with_a_json_content_type() {
        let (res, pending) = Response::channel();
        reply(&res, json!({ "a": 1 }), Some(StatusCode::CREATED)).unwrap();

        let out = pending.recv().await.unwrap();
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_string(out).await, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn scalars_are_sent_as_text() {
        let (res, pending) = Response::channel();
        reply(&res, json!(42), None).unwrap();

        let out = pending.recv().await.unwrap();
        assert!(out.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_string(out).await, "42");
    }

    #[tokio::test]
    async fn null_and_none_are_empty() {
        let (res, pending) = Response::channel();
        reply(&res, Value::Null, None).unwrap();
        assert_eq!(body_string(pending.recv().await.unwrap()).await, "");

        let (res, pending) = Response::channel();
        reply(&res, None::<String>, None).unwrap();
        assert_eq!(body_string(pending.recv().await.unwrap()).await, "");
    }

    #[tokio::test]
    async fn error_payload_overrides_html_content_type_with_a_warning() {
        let (res, pending) = Response::channel();
        res.set_header("Content-Type", "text/html").unwrap();

        let payload = ReplyPayload::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "statusCode": 500, "message": "x" }),
        );
        let (result, logs) = capture_logs(|| reply(&res, payload, Some(StatusCode::INTERNAL_SERVER_ERROR)));
        result.unwrap();

        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("Content-Type doesn't match reply body"), "{logs}");
        let out = pending.recv().await.unwrap();
        assert_eq!(out.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_string(out).await, r#"{"message":"x","statusCode":500}"#);
    }

    #[tokio::test]
    async fn non_error_payload_keeps_the_handler_content_type() {
        let (res, pending) = Response::channel();
        res.set_header("content-type", "text/html").unwrap();

        let (result, logs) = capture_logs(|| reply(&res, json!({ "ok": true }), None));
        result.unwrap();

        assert!(!logs.contains("WARN"), "{logs}");
        assert_eq!(pending.recv().await.unwrap().headers()[CONTENT_TYPE], "text/html");
    }

    #[tokio::test]
    async fn stream_headers_only_fill_gaps() {
        let (res, pending) = Response::channel();
        res.set_header("content-length", "10").unwrap();

        let file = StreamableFile::new(futures_util::stream::iter(vec![Ok(Bytes::from_static(b"0123456789"))]))
            .content_type("application/pdf")
            .disposition(r#"attachment; filename="a.pdf""#)
            .length(42);
        reply(&res, file, None).unwrap();

        let out = pending.recv().await.unwrap();
        assert_eq!(out.headers()[CONTENT_LENGTH], "10");
        assert_eq!(out.headers()[CONTENT_TYPE], "application/pdf");
        assert_eq!(out.headers()[CONTENT_DISPOSITION], r#"attachment; filename="a.pdf""#);
    }

    #[tokio::test]
    async fn stream_without_descriptor_headers_sets_none() {
        let (res, pending) = Response::channel();
        let file = StreamableFile::new(futures_util::stream::empty());
        reply(&res, file, None).unwrap();

        let out = pending.recv().await.unwrap();
        assert!(out.headers().get(CONTENT_TYPE).is_none());
        assert!(out.headers().get(CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn stream_completion_runs_the_completion_hook() {
        let completed = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (c, e) = (Arc::clone(&completed), Arc::clone(&errors));

        let file = StreamableFile::from_bytes("hello")
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        let (res, pending) = Response::channel();
        reply(&res, file, None).unwrap();
        let out = pending.recv().await.unwrap();
        assert_eq!(out.headers()[CONTENT_LENGTH], "5");
        assert_eq!(body_string(out).await, "hello");

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_errors_go_to_the_error_hook_and_abort_the_body() {
        let seen = Arc::new(Mutex::new(None));
        let completed = Arc::new(AtomicUsize::new(0));
        let (s, c) = (Arc::clone(&seen), Arc::clone(&completed));

        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk gone")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let file = StreamableFile::new(chunks)
            .on_error(move |err| *s.lock().unwrap() = Some(err.to_string()))
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });

        let (res, pending) = Response::channel();
        reply(&res, file, None).unwrap();
        let mut body = pending.recv().await.unwrap().into_body();

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), Bytes::from_static(b"partial"));
        let failed = body.frame().await.unwrap();
        assert_eq!(failed.unwrap_err().to_string(), "disk gone");
        assert!(body.frame().await.is_none());

        assert_eq!(seen.lock().unwrap().as_deref(), Some("disk gone"));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn json_null_is_an_empty_reply() {
        assert!(matches!(ReplyPayload::json(&None::<u32>).unwrap(), ReplyPayload::Empty));
        assert!(matches!(ReplyPayload::json(&()).unwrap(), ReplyPayload::Empty));

        let (res, pending) = Response::channel();
        reply(&res, ReplyPayload::json(&None::<u32>).unwrap(), None).unwrap();
        let out = pending.recv().await.unwrap();
        assert!(out.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_string(out).await, "");
    }

    #[test]
    fn only_error_statuses_count_as_error_payloads() {
        assert_eq!(
            ReplyPayload::error(StatusCode::NOT_FOUND, json!({})).error_status(),
            Some(StatusCode::NOT_FOUND)
        );
        assert_eq!(ReplyPayload::error(StatusCode::OK, json!({})).error_status(), None);
        assert_eq!(ReplyPayload::json(&json!({})).unwrap().error_status(), None);
    }
}
