//! Server lifecycle handle.
//!
//! [`ServerHandle`] wraps exactly one engine [`Server`] and gives a host
//! framework the start / address / stop surface it expects, without exposing
//! how the engine binds sockets.
//!
//! ```text
//! Created ──listen ok──▶ Listening ──close──▶ Closed
//!    └────────────────close───────────────────▲
//! ```
//!
//! Transitions are one-way: no second `listen`, no `listen` after `close`.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Error;
use crate::server::{self, Server};

/// Host used when `listen` is not given one.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Called once the server is accepting connections.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

// ── Listen arguments ──────────────────────────────────────────────────────────

/// The optional arguments of [`ServerHandle::listen`].
///
/// Text converts into a host, a `(host, callback)` pair into both;
/// a callback on its own goes through [`ListenArgs::callback`].
#[derive(Default)]
pub enum ListenArgs {
    #[default]
    None,
    Host(String),
    HostAndCallback(String, ReadyCallback),
    Callback(ReadyCallback),
}

impl ListenArgs {
    pub fn callback(f: impl FnOnce() + Send + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    fn resolve(self) -> (Option<String>, Option<ReadyCallback>) {
        match self {
            Self::None => (None, None),
            Self::Host(host) => (Some(host), None),
            Self::HostAndCallback(host, callback) => (Some(host), Some(callback)),
            Self::Callback(callback) => (None, Some(callback)),
        }
    }
}

impl From<&str> for ListenArgs {
    fn from(host: &str) -> Self {
        Self::Host(host.to_owned())
    }
}

impl From<String> for ListenArgs {
    fn from(host: String) -> Self {
        Self::Host(host)
    }
}

impl<F: FnOnce() + Send + 'static> From<(&str, F)> for ListenArgs {
    fn from((host, callback): (&str, F)) -> Self {
        Self::HostAndCallback(host.to_owned(), Box::new(callback))
    }
}

/// A port given as a number or as text (`"8080"`).
pub trait IntoPort {
    fn into_port(self) -> Result<u16, Error>;
}

impl IntoPort for u16 {
    fn into_port(self) -> Result<u16, Error> {
        Ok(self)
    }
}

macro_rules! impl_into_port {
    ($($ty:ty),*) => {$(
        impl IntoPort for $ty {
            fn into_port(self) -> Result<u16, Error> {
                u16::try_from(self).map_err(|_| Error::InvalidPort(self.to_string()))
            }
        }
    )*};
}

impl_into_port!(i32, i64, u32, u64, usize);

impl IntoPort for &str {
    fn into_port(self) -> Result<u16, Error> {
        self.trim().parse().map_err(|_| Error::InvalidPort(self.to_owned()))
    }
}

impl IntoPort for String {
    fn into_port(self) -> Result<u16, Error> {
        self.as_str().into_port()
    }
}

// ── ServerHandle ──────────────────────────────────────────────────────────────

/// Lifecycle state of a [`ServerHandle`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Created,
    Listening,
    Closed,
}

enum State {
    Created,
    Listening {
        addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        accept_loop: JoinHandle<()>,
    },
    Closed {
        accept_loop: Option<JoinHandle<()>>,
    },
}

/// Start / address / stop handle around one engine [`Server`].
pub struct ServerHandle {
    server: Server,
    state: Mutex<State>,
}

impl ServerHandle {
    pub fn new(server: Server) -> Self {
        Self { server, state: Mutex::new(State::Created) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        match &*self.lock() {
            State::Created => LifecycleState::Created,
            State::Listening { .. } => LifecycleState::Listening,
            State::Closed { .. } => LifecycleState::Closed,
        }
    }

    /// Binds `host:port` and starts accepting connections.
    ///
    /// A textual second argument is the host (`0.0.0.0` when absent); a
    /// callback runs only after the socket is bound. Bind failures are
    /// returned and the callback is dropped without being called.
    ///
    /// ```rust,no_run
    /// # async fn run(handle: tsu_adapter::ServerHandle) -> Result<(), tsu_adapter::Error> {
    /// use tsu_adapter::ListenArgs;
    ///
    /// handle.listen(8080, ListenArgs::callback(|| println!("ready"))).await?;
    /// # Ok(()) }
    /// ```
    pub async fn listen(&self, port: impl IntoPort, args: impl Into<ListenArgs>) -> Result<(), Error> {
        let port = port.into_port()?;
        let (host, callback) = args.into().resolve();
        let host = host.unwrap_or_else(|| DEFAULT_HOST.to_owned());

        self.ensure_created()?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let addr = listener.local_addr()?;

        {
            let mut state = self.lock();
            // Re-check: the lock was released while binding.
            self.check_created(&state)?;
            let (shutdown, stop) = oneshot::channel();
            let accept_loop = tokio::spawn(server::serve(listener, self.server.service(), stop));
            *state = State::Listening { addr, shutdown, accept_loop };
        }

        info!(%addr, "tsu listening");
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), Error> {
        self.check_created(&self.lock())
    }

    fn check_created(&self, state: &State) -> Result<(), Error> {
        match state {
            State::Created => Ok(()),
            State::Listening { .. } => Err(Error::AlreadyListening),
            State::Closed { .. } => Err(Error::Closed),
        }
    }

    /// Stops accepting new connections. Idempotent; legal before `listen`.
    ///
    /// In-flight connections keep draining in the background; use
    /// [`shutdown`](ServerHandle::shutdown) to wait for them.
    pub fn close(&self) {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut *state, State::Closed { accept_loop: None });
        *state = match previous {
            State::Listening { addr, shutdown, accept_loop } => {
                info!(%addr, "closing");
                // The accept loop may already be gone; nothing to stop then.
                let _ = shutdown.send(());
                State::Closed { accept_loop: Some(accept_loop) }
            }
            closed @ State::Closed { .. } => closed,
            State::Created => State::Closed { accept_loop: None },
        };
    }

    /// Closes the handle and waits until every in-flight connection is done.
    pub async fn shutdown(&self) {
        self.close();
        let accept_loop = match &mut *self.lock() {
            State::Closed { accept_loop } => accept_loop.take(),
            _ => None,
        };
        if let Some(accept_loop) = accept_loop {
            if let Err(e) = accept_loop.await {
                tracing::error!("accept loop failed: {e}");
            }
        }
    }

    /// `ip:port` while listening, an empty string otherwise.
    pub fn address(&self) -> String {
        self.local_addr().map(|addr| addr.to_string()).unwrap_or_default()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lock() {
            State::Listening { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Accepts a one-time listener for `event` (`"error"`, `"close"`, …).
    ///
    /// The engine emits no such events, so the listener never fires. It is
    /// dropped right away.
    pub fn once(&self, event: &str, listener: impl FnOnce() + Send + 'static) {
        debug!(event, "event listeners are not supported, ignoring");
        drop(listener);
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. If a handler cannot be installed the
/// corresponding arm never resolves.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves; on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
