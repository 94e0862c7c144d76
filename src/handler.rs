//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one radix tree per
//! method, so each handler is hidden behind a trait object
//! (`dyn ErasedHandler`).
//!
//! ```text
//! async fn hello(req: Request, res: Response) { … }  ← user writes this
//!        ↓ server.route(RouteMethod::Get, "/", hello)
//! hello.into_boxed_handler()                          ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                          ← stored as BoxedHandler
//!        ↓
//! handler.call(req, res)  at request time             ← one vtable dispatch
//! ```
//!
//! Unlike a `Request -> Response` function, a handler here *writes* to the
//! [`Response`] handle it is given. The value it returns only says whether it
//! failed: `()` for infallible handlers, `Result<(), Error>` for the rest.
//! Errors go to the server's error handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` let tokio move the future across threads and spawn it.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the return type of the public
/// `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request, res: Response) -> BoxFuture<Result<(), Error>>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Error hook: receives the failing request, its response and the error.
pub(crate) type BoxedErrorHandler =
    Arc<dyn Fn(Request, Response, Error) -> BoxFuture<()> + Send + Sync + 'static>;

// ── Handler output ────────────────────────────────────────────────────────────

/// What a handler's future may resolve to.
pub trait HandlerOutput: private::SealedOutput + Send + 'static {
    #[doc(hidden)]
    fn into_result(self) -> Result<(), Error>;
}

impl HandlerOutput for () {
    fn into_result(self) -> Result<(), Error> {
        Ok(())
    }
}

impl HandlerOutput for Result<(), Error> {
    fn into_result(self) -> Result<(), Error> {
        self
    }
}

impl private::SealedOutput for () {}
impl private::SealedOutput for Result<(), Error> {}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Automatically satisfied for any function or closure with the shape
///
/// ```text
/// async fn name(req: Request, res: Response) [-> Result<(), Error>]
/// ```
///
/// Closures need their parameter types spelled out
/// (`|req: Request, res: Response| async move { … }`).
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
    pub trait SealedOutput {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype bridging a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput,
{
    fn call(&self, req: Request, res: Response) -> BoxFuture<Result<(), Error>> {
        let fut = (self.0)(req, res);
        Box::pin(async move { fut.await.into_result() })
    }
}
