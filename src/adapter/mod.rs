//! The host-framework contract and its hyper implementation.
//!
//! A host framework describes its application through [`HttpAdapter`]:
//! routes per method, global middleware, request accessors and reply
//! primitives. [`HyperAdapter`] maps each of those onto the tsu engine
//! ([`Server`], [`Request`], [`Response`]) without the host ever touching the
//! engine API directly.
//!
//! ```rust,no_run
//! use tsu_adapter::{HttpAdapter, HyperAdapter, ListenArgs, Request, Response, RouteTarget};
//!
//! # async fn run() -> Result<(), tsu_adapter::Error> {
//! let adapter = HyperAdapter::new();
//! adapter.post(RouteTarget::at("/users", |req: Request, res: Response| async move {
//!     res.json(&req.body())
//! }))?;
//! adapter.listen(3000, ListenArgs::callback(|| println!("ready"))).await?;
//! # Ok(()) }
//! ```

mod binding;
mod reply;
mod static_assets;

use std::convert::Infallible;
use std::future::Future;
use std::sync::OnceLock;

use http::StatusCode;
use tower::{Layer, Service};
use tracing::debug;

use crate::body::Body;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::lifecycle::{IntoPort, ListenArgs, ServerHandle};
use crate::method::RouteMethod;
use crate::middleware::{CorsLayer, EngineService};
use crate::request::Request;
use crate::response::Response;
use crate::server::Server;

pub use binding::{DEFAULT_PATH, RouteTarget};
pub use reply::{ReplyPayload, StreamableFile, reply};
pub use static_assets::{AssetFilter, CacheLimits, StaticAssetsOptions};

/// API version a route is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// Matches requests carrying any version, or none.
    Neutral,
    One(String),
    Many(Vec<String>),
}

/// Registers middleware for one method at a path.
pub type MiddlewareFactory = Box<dyn Fn(&str, BoxedHandler) -> Result<(), Error> + Send + Sync>;

/// What a host framework needs from an HTTP engine.
pub trait HttpAdapter {
    type Request;
    type Response;

    // ── Routes ───────────────────────────────────────────────────────────────

    fn get(&self, target: RouteTarget) -> Result<(), Error>;
    fn post(&self, target: RouteTarget) -> Result<(), Error>;
    fn put(&self, target: RouteTarget) -> Result<(), Error>;
    fn patch(&self, target: RouteTarget) -> Result<(), Error>;
    fn delete(&self, target: RouteTarget) -> Result<(), Error>;
    fn head(&self, target: RouteTarget) -> Result<(), Error>;
    fn options(&self, target: RouteTarget) -> Result<(), Error>;
    /// Every method.
    fn all(&self, target: RouteTarget) -> Result<(), Error>;

    /// Global middleware, applied on the next `listen`.
    fn use_layer<L>(&self, layer: L)
    where
        L: Layer<EngineService> + Send + Sync + 'static,
        L::Service: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<http::Request<Body>>>::Future: Send + 'static;

    // ── Lifecycle ────────────────────────────────────────────────────────────

    fn listen(
        &self,
        port: impl IntoPort + Send,
        args: impl Into<ListenArgs> + Send,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stops the server and waits for in-flight connections.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn init(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn init_http_server(&self);

    // ── Bridges ──────────────────────────────────────────────────────────────

    fn use_static_assets(&self, path: &str, options: StaticAssetsOptions);

    fn set_view_engine(&self, engine: &str);

    fn get_request_hostname<'a>(&self, request: &'a Self::Request) -> &'a str;

    fn get_request_method<'a>(&self, request: &'a Self::Request) -> &'a str;

    fn get_request_url<'a>(&self, request: &'a Self::Request) -> &'a str;

    fn status(&self, response: &Self::Response, code: u16) -> Result<(), Error>;

    fn reply(
        &self,
        response: &Self::Response,
        body: impl Into<ReplyPayload>,
        status: Option<u16>,
    ) -> Result<(), Error>;

    fn end(&self, response: &Self::Response, message: Option<&str>);

    fn render(&self, response: &Self::Response, view: &str);

    fn redirect(&self, response: &Self::Response, code: u16, url: &str) -> Result<(), Error>;

    fn set_error_handler<F, Fut>(&self, handler: F, prefix: Option<&str>)
    where
        F: Fn(Request, Response, Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static;

    fn set_not_found_handler(&self, handler: impl Handler, prefix: Option<&str>);

    fn is_headers_sent(&self, response: &Self::Response) -> bool;

    fn get_header(&self, response: &Self::Response, name: &str) -> Option<String>;

    fn set_header(&self, response: &Self::Response, name: &str, value: &str) -> Result<(), Error>;

    fn register_parser_middleware(&self, prefix: Option<&str>, raw_body: bool);

    fn enable_cors(&self, cors: CorsLayer);

    fn create_middleware_factory(&self, method: RouteMethod) -> Result<MiddlewareFactory, Error>;

    /// Engine name, for diagnostics.
    fn get_type(&self) -> &'static str;

    fn apply_version_filter(&self, handler: BoxedHandler, version: Version) -> Result<BoxedHandler, Error>;
}

// ── HyperAdapter ──────────────────────────────────────────────────────────────

/// [`HttpAdapter`] on top of the tsu engine.
pub struct HyperAdapter {
    server: Server,
    http_server: OnceLock<ServerHandle>,
}

impl HyperAdapter {
    pub fn new() -> Self {
        Self::with_server(Server::new())
    }

    /// Adapts an engine that may already have routes of its own.
    pub fn with_server(server: Server) -> Self {
        Self { server, http_server: OnceLock::new() }
    }

    /// Adapter whose engine applies `config`'s body limit.
    pub fn from_config(config: &ServerConfig) -> Self {
        let adapter = Self::new();
        adapter.server.set_body_limit(config.max_body_size);
        adapter
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The lifecycle handle, created on first use.
    pub fn http_server(&self) -> &ServerHandle {
        self.http_server.get_or_init(|| ServerHandle::new(self.server.clone()))
    }

    fn route(&self, method: RouteMethod, target: RouteTarget) -> Result<(), Error> {
        binding::bind(&self.server, method, target)
    }
}

impl Default for HyperAdapter {
    fn default() -> Self { Self::new() }
}

fn status_code(code: u16) -> Result<StatusCode, Error> {
    StatusCode::from_u16(code).map_err(|_| Error::InvalidStatus(code))
}

fn ignore_prefix(hook: &'static str, prefix: Option<&str>) {
    if let Some(prefix) = prefix {
        debug!(hook, prefix, "scoped handlers are not supported, registering globally");
    }
}

impl HttpAdapter for HyperAdapter {
    type Request = Request;
    type Response = Response;

    fn get(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Get, target)
    }

    fn post(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Post, target)
    }

    fn put(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Put, target)
    }

    fn patch(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Patch, target)
    }

    fn delete(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Delete, target)
    }

    fn head(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Head, target)
    }

    fn options(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::Options, target)
    }

    fn all(&self, target: RouteTarget) -> Result<(), Error> {
        self.route(RouteMethod::All, target)
    }

    fn use_layer<L>(&self, layer: L)
    where
        L: Layer<EngineService> + Send + Sync + 'static,
        L::Service: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<http::Request<Body>>>::Future: Send + 'static,
    {
        self.server.use_layer(layer);
    }

    async fn listen(&self, port: impl IntoPort + Send, args: impl Into<ListenArgs> + Send) -> Result<(), Error> {
        self.http_server().listen(port, args).await
    }

    async fn close(&self) {
        if let Some(handle) = self.http_server.get() {
            handle.shutdown().await;
        }
    }

    /// Nothing to prepare; the engine is ready once constructed.
    async fn init(&self) -> Result<(), Error> {
        debug!("init: nothing to do for the hyper adapter");
        Ok(())
    }

    fn init_http_server(&self) {
        self.http_server();
    }

    /// Inert: static files are served by a separate component, if at all.
    fn use_static_assets(&self, path: &str, options: StaticAssetsOptions) {
        debug!(path, ?options, "static assets are not served by the hyper adapter");
    }

    /// Inert: there is no view engine; `render` sends markup as-is.
    fn set_view_engine(&self, engine: &str) {
        debug!(engine, "view engines are not supported by the hyper adapter");
    }

    fn get_request_hostname<'a>(&self, request: &'a Request) -> &'a str {
        request.hostname()
    }

    fn get_request_method<'a>(&self, request: &'a Request) -> &'a str {
        request.method().as_str()
    }

    fn get_request_url<'a>(&self, request: &'a Request) -> &'a str {
        request.original_url()
    }

    fn status(&self, response: &Response, code: u16) -> Result<(), Error> {
        response.status(status_code(code)?);
        Ok(())
    }

    fn reply(&self, response: &Response, body: impl Into<ReplyPayload>, status: Option<u16>) -> Result<(), Error> {
        let status = status.map(status_code).transpose()?;
        reply::reply(response, body, status)
    }

    fn end(&self, response: &Response, message: Option<&str>) {
        response.end(message);
    }

    fn render(&self, response: &Response, view: &str) {
        response.html(view);
    }

    fn redirect(&self, response: &Response, code: u16, url: &str) -> Result<(), Error> {
        response.status(status_code(code)?);
        response.redirect(url)
    }

    fn set_error_handler<F, Fut>(&self, handler: F, prefix: Option<&str>)
    where
        F: Fn(Request, Response, Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ignore_prefix("error", prefix);
        self.server.set_error_handler(handler);
    }

    fn set_not_found_handler(&self, handler: impl Handler, prefix: Option<&str>) {
        ignore_prefix("not_found", prefix);
        self.server.set_not_found_handler(handler);
    }

    fn is_headers_sent(&self, response: &Response) -> bool {
        response.headers_sent()
    }

    fn get_header(&self, response: &Response, name: &str) -> Option<String> {
        response.header(name)
    }

    fn set_header(&self, response: &Response, name: &str, value: &str) -> Result<(), Error> {
        response.set_header(name, value)?;
        Ok(())
    }

    /// Bodies are always parsed as JSON by the route wrapper.
    fn register_parser_middleware(&self, prefix: Option<&str>, raw_body: bool) {
        debug!(?prefix, raw_body, "body parsing is built into every route");
    }

    fn enable_cors(&self, cors: CorsLayer) {
        self.server.use_layer(cors);
    }

    fn create_middleware_factory(&self, _method: RouteMethod) -> Result<MiddlewareFactory, Error> {
        Err(Error::NotImplemented("create_middleware_factory"))
    }

    fn get_type(&self) -> &'static str {
        "hyper"
    }

    fn apply_version_filter(&self, _handler: BoxedHandler, _version: Version) -> Result<BoxedHandler, Error> {
        Err(Error::NotImplemented("apply_version_filter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::request::test_request;
    use crate::response::body_string;
    use http::Method;
    use http::header::{CONTENT_TYPE, LOCATION};
    use serde_json::json;

    fn request(method: Method, uri: &str, body: &'static str) -> http::Request<Body> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(crate::body::full(body))
            .unwrap()
    }

    #[tokio::test]
    async fn routes_reply_through_the_shaper() {
        let adapter = HyperAdapter::new();
        adapter
            .post(RouteTarget::at("/echo", |req: Request, res: Response| async move {
                reply(&res, req.body(), Some(StatusCode::CREATED))
            }))
            .unwrap();

        let res = adapter.server().handle(request(Method::POST, "/echo", r#"{"a":1}"#)).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_string(res).await, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn methods_only_match_their_own_verb() {
        let adapter = HyperAdapter::new();
        adapter
            .put(RouteTarget::at("items/{id}", |req: Request, res: Response| async move {
                res.send(req.param("id").unwrap_or_default().to_owned());
            }))
            .unwrap();

        let put = adapter.server().handle(request(Method::PUT, "/items/7", "")).await;
        assert_eq!(body_string(put).await, "7");
        let get = adapter.server().handle(request(Method::GET, "/items/7", "")).await;
        assert_eq!(get.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn config_body_limit_reaches_the_engine() {
        let config = ServerConfig { max_body_size: 4, ..ServerConfig::default() };
        let adapter = HyperAdapter::from_config(&config);
        adapter
            .post(RouteTarget::at("/echo", |req: Request, res: Response| async move {
                reply(&res, req.body(), None)
            }))
            .unwrap();

        let res = adapter.server().handle(request(Method::POST, "/echo", r#"{"a":1}"#)).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn request_accessors() {
        let adapter = HyperAdapter::new();
        let req = test_request(Method::PATCH, "/users/1?full=true", "");
        assert_eq!(adapter.get_request_hostname(&req), "api.example.com");
        assert_eq!(adapter.get_request_method(&req), "PATCH");
        assert_eq!(adapter.get_request_url(&req), "/users/1?full=true");
    }

    #[tokio::test]
    async fn status_rejects_out_of_range_codes() {
        let adapter = HyperAdapter::new();
        let (res, _pending) = Response::channel();
        assert!(matches!(adapter.status(&res, 1000), Err(Error::InvalidStatus(1000))));
        adapter.status(&res, 418).unwrap();
        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn reply_with_a_status() {
        let adapter = HyperAdapter::new();
        let (res, pending) = Response::channel();
        adapter.reply(&res, json!({ "ok": true }), Some(202)).unwrap();

        let out = pending.recv().await.unwrap();
        assert_eq!(out.status(), StatusCode::ACCEPTED);
        assert_eq!(body_string(out).await, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn header_accessors_are_case_insensitive() {
        let adapter = HyperAdapter::new();
        let (res, pending) = Response::channel();
        adapter.set_header(&res, "X-Trace", "a").unwrap();
        adapter.set_header(&res, "x-trace", "b").unwrap();
        assert_eq!(adapter.get_header(&res, "X-TRACE").as_deref(), Some("b"));
        assert!(!adapter.is_headers_sent(&res));

        adapter.end(&res, Some("done"));
        assert!(adapter.is_headers_sent(&res));
        assert_eq!(body_string(pending.recv().await.unwrap()).await, "done");
    }

    #[tokio::test]
    async fn redirect_uses_the_given_code() {
        let adapter = HyperAdapter::new();
        let (res, pending) = Response::channel();
        adapter.redirect(&res, 301, "/new").unwrap();

        let out = pending.recv().await.unwrap();
        assert_eq!(out.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(out.headers()[LOCATION], "/new");
    }

    #[tokio::test]
    async fn render_sends_html() {
        let adapter = HyperAdapter::new();
        let (res, pending) = Response::channel();
        adapter.render(&res, "<h1>hi</h1>");

        let out = pending.recv().await.unwrap();
        assert_eq!(out.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(body_string(out).await, "<h1>hi</h1>");
    }

    #[tokio::test]
    async fn scoped_hooks_are_registered_globally() {
        let adapter = HyperAdapter::new();
        adapter.set_not_found_handler(
            |_req: Request, res: Response| async move {
                res.status(StatusCode::NOT_FOUND);
                res.send("nothing here");
            },
            Some("/api"),
        );

        let res = adapter.server().handle(request(Method::GET, "/elsewhere", "")).await;
        assert_eq!(body_string(res).await, "nothing here");
    }

    #[tokio::test]
    async fn error_hook_sees_body_parse_errors() {
        let adapter = HyperAdapter::new();
        adapter
            .post(RouteTarget::at("/users", |_req: Request, res: Response| async move {
                res.end(None);
            }))
            .unwrap();
        adapter.set_error_handler(
            |_req, res: Response, err: Error| async move {
                let status = err.status();
                let body = json!({ "statusCode": status.as_u16(), "message": "Bad Request" });
                let _ = reply(&res, ReplyPayload::error(status, body), Some(status));
            },
            None,
        );

        let res = adapter.server().handle(request(Method::POST, "/users", "not json")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(res).await, r#"{"message":"Bad Request","statusCode":400}"#);
    }

    #[test]
    fn unsupported_features_fail_fast() {
        let adapter = HyperAdapter::new();
        let handler = (|_req: Request, _res: Response| async {}).into_boxed_handler();

        assert!(matches!(
            adapter.apply_version_filter(handler, Version::One("1".into())),
            Err(Error::NotImplemented("apply_version_filter"))
        ));
        assert!(matches!(
            adapter.create_middleware_factory(RouteMethod::Get),
            Err(Error::NotImplemented("create_middleware_factory"))
        ));
        assert_eq!(adapter.get_type(), "hyper");
    }

    #[tokio::test]
    async fn stubs_are_inert() {
        let adapter = HyperAdapter::new();
        adapter.init().await.unwrap();
        adapter.use_static_assets("/public", StaticAssetsOptions::default());
        adapter.set_view_engine("handlebars");
        adapter.register_parser_middleware(None, false);

        let res = adapter.server().handle(request(Method::GET, "/public/app.js", "")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn one_lifecycle_handle_per_adapter() {
        let adapter = HyperAdapter::new();
        adapter.init_http_server();
        adapter.init_http_server();
        assert!(std::ptr::eq(adapter.http_server(), adapter.http_server()));

        adapter.listen(0u16, "127.0.0.1").await.unwrap();
        assert_eq!(adapter.http_server().state(), LifecycleState::Listening);
        assert!(!adapter.http_server().address().is_empty());

        adapter.close().await;
        adapter.close().await;
        assert_eq!(adapter.http_server().state(), LifecycleState::Closed);
        assert_eq!(adapter.http_server().address(), "");
    }

    #[tokio::test]
    async fn close_before_listen_is_harmless() {
        let adapter = HyperAdapter::new();
        adapter.close().await;
        adapter.listen(0u16, "127.0.0.1").await.unwrap();
        adapter.close().await;
    }
}
