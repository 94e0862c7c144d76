//! Route binding: host routes onto engine registrations.
//!
//! Every host route goes through [`bind`], which registers a
//! request-preparation wrapper with the engine instead of the host handler
//! itself. Per request the wrapper:
//!
//! 1. opens an atomic scope on the response;
//! 2. drains and parses the body as JSON and attaches it with
//!    [`Request::set_body`]. A parse failure is returned to the engine,
//!    which hands it to the error handler;
//! 3. spawns the host handler and returns **without waiting for it**.
//!
//! Step 3 keeps long-running handlers out of the atomic scope. When the
//! handler task fails before it answered, its error goes to the server's
//! error handler like any other request error. Failures after the response
//! was sent are only logged.

use std::sync::Arc;

use tracing::error;

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::RouteMethod;
use crate::request::Request;
use crate::response::Response;
use crate::server::{Server, WeakServer};

/// Mount path used when a route is registered without one.
pub const DEFAULT_PATH: &str = "";

/// Where a host route goes: an explicit path, or the mount root.
pub enum RouteTarget {
    Path(String, BoxedHandler),
    Root(BoxedHandler),
}

impl RouteTarget {
    /// Route at `path`.
    pub fn at(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::Path(path.into(), handler.into_boxed_handler())
    }

    /// Route at the mount root; matches every path below it.
    pub fn root(handler: impl Handler) -> Self {
        Self::Root(handler.into_boxed_handler())
    }

    fn into_parts(self) -> (String, BoxedHandler) {
        match self {
            Self::Path(path, handler) => (path, handler),
            Self::Root(handler) => (DEFAULT_PATH.to_owned(), handler),
        }
    }
}

/// Registers `target` on `server` for `method`, behind the preparation wrapper.
pub(crate) fn bind(server: &Server, method: RouteMethod, target: RouteTarget) -> Result<(), Error> {
    let (path, handler) = target.into_parts();
    server.route(method, &path, prepare(server.downgrade(), handler))
}

/// Wraps a host handler in body preparation and detached dispatch.
pub(crate) fn prepare(server: WeakServer, handler: BoxedHandler) -> impl Handler {
    move |request: Request, response: Response| {
        let handler = Arc::clone(&handler);
        let server = server.clone();
        async move {
            let scope = response.clone();
            scope
                .atomic(async move {
                    let body = request.json().await?;
                    request.set_body(body);
                    dispatch(server, &handler, request, response);
                    Ok::<(), Error>(())
                })
                .await
        }
    }
}

/// Starts the host handler as its own task.
fn dispatch(server: WeakServer, handler: &BoxedHandler, request: Request, response: Response) {
    let task = handler.call(request.clone(), response.clone());

    tokio::spawn(async move {
        let Err(err) = task.await else { return };
        match server.upgrade() {
            Some(server) if !response.is_finished() => server.handle_error(request, response, err).await,
            _ => error!(
                method = %request.method(),
                url = request.original_url(),
                "route handler failed: {err}"
            ),
        }
    });
}
