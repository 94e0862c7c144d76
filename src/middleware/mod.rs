//! Global middleware.
//!
//! Middleware is plain [`tower`] layers wrapped around the engine's dispatch
//! service, so anything from `tower-http` (CORS, tracing, compression) plugs
//! in unchanged. Layers are applied when the server starts listening; the
//! first layer registered is the outermost one and sees the request first.

use std::convert::Infallible;

use tower::util::BoxCloneService;
use tower::{Layer, Service};

use crate::body::Body;

pub use tower_http::cors::CorsLayer;

/// The engine's dispatch service, as seen by middleware.
pub type EngineService = BoxCloneService<http::Request<Body>, http::Response<Body>, Infallible>;

type BoxLayer = Box<dyn Fn(EngineService) -> EngineService + Send + Sync + 'static>;

/// Ordered list of global layers.
#[derive(Default)]
pub(crate) struct Stack {
    layers: Vec<BoxLayer>,
}

impl Stack {
    pub(crate) fn push<L>(&mut self, layer: L)
    where
        L: Layer<EngineService> + Send + Sync + 'static,
        L::Service: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<http::Request<Body>>>::Future: Send + 'static,
    {
        self.layers.push(Box::new(move |inner| BoxCloneService::new(layer.layer(inner))));
    }

    pub(crate) fn len(&self) -> usize {
        self.layers.len()
    }

    /// Wraps `inner` so that the first pushed layer ends up outermost.
    pub(crate) fn wrap(&self, inner: EngineService) -> EngineService {
        self.layers.iter().rev().fold(inner, |svc, layer| layer(svc))
    }
}
