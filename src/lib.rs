//! # tsu-adapter
//!
//! Runs a framework-agnostic web application on a small hyper engine.
//!
//! A host framework speaks in routes, middleware and reply payloads. The
//! engine ([`Server`]) speaks in radix-tree registrations and a writable
//! [`Response`] handle. [`HyperAdapter`] translates between the two:
//!
//! - **Route binding**: every host route is registered behind a wrapper
//!   that parses the JSON body inside an atomic response scope, then starts
//!   the host handler without waiting for it ([`RouteTarget`]).
//! - **Reply shaping**: objects, text, empty bodies and byte streams become
//!   header-consistent responses; content headers are only filled in, never
//!   overwritten ([`reply`], [`ReplyPayload`]).
//! - **Lifecycle**: `listen` / `address` / `close` over one owned
//!   [`ServerHandle`].
//! - **Bridges**: CORS through `tower-http`, error and not-found hooks,
//!   request and header accessors.
//!
//! What the engine owns and the adapter leaves alone: HTTP parsing (hyper),
//! route matching ([`matchit`]), connection management and graceful drain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tsu_adapter::{
//!     CorsLayer, HttpAdapter, HyperAdapter, ListenArgs, Request, Response, RouteTarget, reply,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tsu_adapter::Error> {
//!     let app = HyperAdapter::new();
//!     app.enable_cors(CorsLayer::permissive());
//!
//!     app.get(RouteTarget::at("/users/{id}", |req: Request, res: Response| async move {
//!         let id = req.param("id").unwrap_or_default().to_owned();
//!         reply(&res, serde_json::json!({ "id": id }), None)
//!     }))?;
//!
//!     app.listen(3000, ListenArgs::callback(|| println!("ready"))).await?;
//!     tsu_adapter::shutdown_signal().await;
//!     app.close().await;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod handler;
mod lifecycle;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod adapter;
pub mod body;
pub mod middleware;

pub use adapter::{
    HttpAdapter, HyperAdapter, ReplyPayload, RouteTarget, StaticAssetsOptions, StreamableFile, Version,
    reply,
};
pub use body::Body;
pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, BoxedHandler, Handler, HandlerOutput};
pub use lifecycle::{
    DEFAULT_HOST, IntoPort, LifecycleState, ListenArgs, ReadyCallback, ServerHandle, shutdown_signal,
};
pub use method::RouteMethod;
pub use middleware::CorsLayer;
pub use request::{DEFAULT_BODY_LIMIT, Request};
pub use response::{ContentType, Response};
pub use server::Server;
