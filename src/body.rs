//! Body type shared by requests, responses and middleware.
//!
//! hyper hands us `Incoming`, handlers hand back buffered bytes or streams,
//! and tower middleware sits in between. Boxing everything into one
//! [`Body`] type keeps the middleware stack and the router monomorphic.

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;

use crate::error::BoxError;

/// Type-erased HTTP body used on both sides of the engine.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// A body with no bytes.
pub fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// A fully buffered body.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

/// A body fed chunk by chunk from `stream`.
pub fn from_stream<S, E>(stream: S) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    StreamBody::new(stream.map_ok(Frame::data).map_err(Into::<BoxError>::into)).boxed_unsync()
}

/// Erases the concrete body type of an incoming hyper request.
pub(crate) fn incoming(body: hyper::body::Incoming) -> Body {
    body.map_err(BoxError::from).boxed_unsync()
}
