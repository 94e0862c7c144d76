//! The engine: route table, request dispatch and the accept loop.
//!
//! [`Server`] is the concrete HTTP engine the adapter drives. It owns route
//! registration, the error and not-found hooks, and global middleware. The
//! socket side (binding, accepting, draining) is started through
//! [`ServerHandle`](crate::ServerHandle), which calls [`serve`] below.
//!
//! # Graceful shutdown
//!
//! When the handle is closed the accept loop:
//! 1. Immediately stops `listener.accept()`; no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns, which resolves [`ServerHandle::shutdown`](crate::ServerHandle::shutdown).

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, error, info};

use crate::body::{self, Body};
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedErrorHandler, BoxedHandler, Handler};
use crate::method::RouteMethod;
use crate::middleware::{EngineService, Stack};
use crate::request::{DEFAULT_BODY_LIMIT, Request};
use crate::response::{ContentType, Response};
use crate::router::Router;

/// The HTTP engine.
///
/// A cheap, cloneable handle; every clone registers into and dispatches from
/// the same route table.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    router: RwLock<Router>,
    error_handler: RwLock<Option<BoxedErrorHandler>>,
    not_found: RwLock<Option<BoxedHandler>>,
    layers: Mutex<Stack>,
    body_limit: AtomicUsize,
}

/// Non-owning handle, for code stored inside the server's own route table.
#[derive(Clone)]
pub(crate) struct WeakServer(Weak<Shared>);

impl WeakServer {
    pub(crate) fn upgrade(&self) -> Option<Server> {
        self.0.upgrade().map(|shared| Server { shared })
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                router: RwLock::new(Router::new()),
                error_handler: RwLock::new(None),
                not_found: RwLock::new(None),
                layers: Mutex::new(Stack::default()),
                body_limit: AtomicUsize::new(DEFAULT_BODY_LIMIT),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakServer {
        WeakServer(Arc::downgrade(&self.shared))
    }

    /// Caps how many body bytes a request may buffer. Larger bodies fail
    /// with `413 Payload Too Large`.
    pub fn set_body_limit(&self, bytes: usize) {
        self.shared.body_limit.store(bytes, Ordering::Relaxed);
    }

    pub fn body_limit(&self) -> usize {
        self.shared.body_limit.load(Ordering::Relaxed)
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; an empty path mounts the handler
    /// at the root so it matches every path.
    pub fn route(&self, method: RouteMethod, path: &str, handler: impl Handler) -> Result<(), Error> {
        self.route_boxed(method, path, handler.into_boxed_handler())
    }

    fn route_boxed(&self, method: RouteMethod, path: &str, handler: BoxedHandler) -> Result<(), Error> {
        self.shared
            .router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(method, path, handler)
    }

    /// Adds a global middleware layer. Takes effect on the next `listen`.
    pub fn use_layer<L>(&self, layer: L)
    where
        L: Layer<EngineService> + Send + Sync + 'static,
        L::Service: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<http::Request<Body>>>::Future: Send + 'static,
    {
        self.shared.layers.lock().unwrap_or_else(PoisonError::into_inner).push(layer);
    }

    /// Replaces the hook called when a handler returns an error.
    pub fn set_error_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Request, Response, Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: BoxedErrorHandler =
            Arc::new(move |req: Request, res: Response, err: Error| -> BoxFuture<()> {
                Box::pin(handler(req, res, err))
            });
        *self.shared.error_handler.write().unwrap_or_else(PoisonError::into_inner) = Some(boxed);
    }

    /// Replaces the handler used when no route matches.
    pub fn set_not_found_handler(&self, handler: impl Handler) {
        *self.shared.not_found.write().unwrap_or_else(PoisonError::into_inner) =
            Some(handler.into_boxed_handler());
    }

    /// The dispatch service wrapped in every registered layer.
    pub(crate) fn service(&self) -> EngineService {
        let server = self.clone();
        let base = BoxCloneService::new(tower::service_fn(move |req| {
            let server = server.clone();
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        }));
        let layers = self.shared.layers.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(layers = layers.len(), "building dispatch service");
        layers.wrap(base)
    }

    // ── Request dispatch ──────────────────────────────────────────────────────

    /// Core hot path: routes one request and waits for its response.
    ///
    /// Handlers write to a [`Response`] handle; the finished response arrives
    /// through the handle's channel, possibly after the handler future itself
    /// has completed.
    pub(crate) async fn handle(&self, req: http::Request<Body>) -> http::Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let found = self
            .shared
            .router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(&method, &path);
        let (handler, params) = match found {
            Some((handler, params)) => (Some(handler), params),
            None => (self.not_found(), HashMap::new()),
        };

        let request = Request::new(req, params, self.body_limit());
        let (response, pending) = Response::channel();

        let outcome = match handler {
            Some(handler) => handler.call(request.clone(), response.clone()).await,
            None => {
                response.status(StatusCode::NOT_FOUND);
                response.end(None);
                Ok(())
            }
        };

        if let Err(err) = outcome {
            self.handle_error(request, response.clone(), err).await;
        }
        drop(response);

        match pending.recv().await {
            Ok(res) => res,
            Err(err) => {
                error!(%method, %path, "{err}");
                let mut res = http::Response::new(body::empty());
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        }
    }

    fn not_found(&self) -> Option<BoxedHandler> {
        self.shared.not_found.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Hands `err` to the error hook, or answers with `err.status()`.
    pub(crate) async fn handle_error(&self, req: Request, res: Response, err: Error) {
        let hook = self.shared.error_handler.read().unwrap_or_else(PoisonError::into_inner).clone();
        match hook {
            Some(hook) => hook(req, res, err).await,
            None => {
                error!(method = %req.method(), url = req.original_url(), "request failed: {err}");
                if res.is_finished() {
                    return;
                }
                let status = err.status();
                res.status(status);
                res.fill_content_type(ContentType::Text);
                res.send(status.canonical_reason().unwrap_or_default());
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self { Self::new() }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections on `listener` until `shutdown` fires (or its sender is
/// dropped), then drains in-flight connections.
pub(crate) async fn serve(
    listener: TcpListener,
    service: EngineService,
    mut shutdown: oneshot::Receiver<()>,
) {
    // JoinSet tracks every spawned connection task so we can wait for
    // them all to finish during shutdown.
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            // `biased` checks shutdown first so a close immediately stops
            // accepting new connections, even if more are queued.
            biased;

            _ = &mut shutdown => {
                info!(in_flight = tasks.len(), "close requested, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let service = service.clone();
                // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper
                // IO traits.
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    // Called once per request on the connection.
                    let svc = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                        let fut: BoxFuture<Result<http::Response<Body>, Infallible>> =
                            Box::pin(service.clone().oneshot(req.map(body::incoming)));
                        fut
                    });

                    // `auto::Builder` transparently handles both HTTP/1.1
                    // and HTTP/2, whatever the client negotiates.
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    while tasks.join_next().await.is_some() {}

    info!("tsu stopped");
}
