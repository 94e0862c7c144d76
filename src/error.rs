//! Unified error type.

use http::StatusCode;
use thiserror::Error;

/// Boxed error used for body streams coming from hyper or from user streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by fallible engine and adapter operations.
///
/// Application-level failures (404, 422, etc.) are still expressed as HTTP
/// responses. This type covers infrastructure failures (binding, config),
/// request-level failures routed to the error handler (body read, JSON parse),
/// and features the adapter refuses to emulate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("body: {0}")]
    Body(#[source] BoxError),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid port `{0}`")]
    InvalidPort(String),

    #[error("server is already listening")]
    AlreadyListening,

    #[error("server is closed")]
    Closed,

    #[error("`{0}` is not supported by the hyper adapter")]
    NotImplemented(&'static str),

    /// Every handle to a response was dropped before anything was sent.
    #[error("handler finished without sending a response")]
    HandlerDropped,
}

impl Error {
    /// Status code the default error handler answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Body(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
