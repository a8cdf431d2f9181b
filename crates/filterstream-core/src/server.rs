//! Native HTTP server implementation
//!
//! hyper HTTP/1 connections on a tokio listener with:
//! - Exact-path dispatch to the filter handler
//! - SO_REUSEADDR and TCP_NODELAY sockets
//! - Connection tracking for graceful shutdown
//!
//! Lifecycle: `Unstarted -> Serving -> Draining -> Terminated`. Shutdown
//! stops the accept loop at once, lets open connections finish until the
//! deadline, then drops whatever is left.

use crate::handler::{handle_filter, StreamContext, DEFAULT_BODY_LIMIT};
use crate::response::{self, ResponseBody};
use crate::router::{Endpoint, Routes};
use crate::stream::{Emitter, StreamConfig};
use crate::{Error, Result};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default grace period for in-flight connections on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port`; an empty host listens on every IPv4 interface
    pub addr: String,
    pub shutdown_grace: Duration,
    /// Largest form body accepted, in bytes
    pub body_limit: usize,
    /// Runtime worker threads
    pub workers: usize,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ":8080".to_string(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            body_limit: DEFAULT_BODY_LIMIT,
            workers: num_cpus::get(),
            stream: StreamConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        self.stream.validate()
    }

    /// Resolve `addr` to the socket address to bind
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let resolved = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", self.addr, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("{}: no addresses found", self.addr)));
        resolved
    }
}

/// Create a listening socket
///
/// SO_REUSEPORT is left off so a second instance fails to bind instead of
/// silently sharing the port.
pub fn create_listener(addr: &SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // TCP_NODELAY - each tweet goes out as soon as it is flushed
    socket.set_nodelay(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Unstarted,
    Serving,
    Draining,
    Terminated,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerPhase::Unstarted => "unstarted",
            ServerPhase::Serving => "serving",
            ServerPhase::Draining => "draining",
            ServerPhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Deadline for a shutdown, fixed when the shutdown is requested
#[derive(Debug, Clone, Copy)]
pub struct ShutdownContext {
    grace: Duration,
    deadline: Instant,
}

impl ShutdownContext {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            deadline: Instant::now() + grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

// ============================================================================
// Connection Tracking for Graceful Shutdown
// ============================================================================

/// Tracks active connections for graceful shutdown
///
/// Used to:
/// - Count active connections
/// - Signal shutdown to reject new connections
/// - Wait for existing connections to drain
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicU64,
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection until the returned guard drops
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait until no connections remain; false if `deadline` passes first
    pub async fn wait_idle(&self, deadline: Instant) -> bool {
        loop {
            if self.count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

/// Keeps one connection counted
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Filter stream host. Cheap to clone; clones share one server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    routes: Routes,
    emitter: Emitter,
    tracker: Arc<ConnectionTracker>,
    phase: Mutex<ServerPhase>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Stops the accept loop and every emitter
    shutdown: CancellationToken,
    /// Drops connections still open after the grace period
    force_close: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let emitter = Emitter::new(config.stream.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                routes: Routes::default(),
                emitter,
                tracker: Arc::new(ConnectionTracker::new()),
                phase: Mutex::new(ServerPhase::Unstarted),
                listener: Mutex::new(None),
                local_addr: Mutex::new(None),
                shutdown: CancellationToken::new(),
                force_close: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> ServerPhase {
        *self.inner.phase.lock()
    }

    pub fn active_connections(&self) -> u64 {
        self.inner.tracker.count()
    }

    /// Address the listener is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Bind the listener ahead of `serve`.
    ///
    /// Optional; `serve` binds on its own. Useful to learn the port when
    /// the configured one is 0.
    pub async fn bind(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let addr = self.inner.config.resolve().await?;
        let listener = create_listener(&addr).map_err(|source| Error::Bind {
            addr: self.inner.config.addr.clone(),
            source,
        })?;
        let local = listener.local_addr()?;

        *self.inner.listener.lock() = Some(listener);
        *self.inner.local_addr.lock() = Some(local);
        Ok(local)
    }

    /// Accept connections until shutdown.
    ///
    /// Returns `Ok(())` once shutdown has stopped the accept loop, including
    /// when shutdown happened before `serve` was called.
    pub async fn serve(&self) -> Result<()> {
        match self.phase() {
            ServerPhase::Unstarted => {}
            ServerPhase::Serving => return Err(Error::AlreadyServing),
            ServerPhase::Draining | ServerPhase::Terminated => return Ok(()),
        }

        let bound = self.inner.listener.lock().is_some();
        if !bound {
            self.bind().await?;
        }

        let listener = {
            let mut phase = self.inner.phase.lock();
            match *phase {
                ServerPhase::Unstarted => {}
                ServerPhase::Serving => return Err(Error::AlreadyServing),
                ServerPhase::Draining | ServerPhase::Terminated => {
                    // Shutdown won the race with bind
                    drop(self.inner.listener.lock().take());
                    return Ok(());
                }
            }
            let listener = self
                .inner
                .listener
                .lock()
                .take()
                .ok_or(Error::AlreadyServing)?;
            *phase = ServerPhase::Serving;
            listener
        };

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "accepting connections");
        }
        self.accept_loop(listener).await;
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let tracker = &self.inner.tracker;

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            // Reject new connections during shutdown
            if tracker.is_shutting_down() {
                drop(stream);
                continue;
            }

            let guard = tracker.track();
            tokio::spawn(serve_connection(self.inner.clone(), stream, peer, guard));
        }

        debug!("accept loop stopped");
    }

    /// Stop accepting, drain open connections until the context's deadline,
    /// then force-close the rest.
    ///
    /// Returns [`Error::ShutdownTimeout`] when connections had to be forced.
    pub async fn shutdown(&self, ctx: ShutdownContext) -> Result<()> {
        {
            let mut phase = self.inner.phase.lock();
            if *phase == ServerPhase::Terminated {
                return Ok(());
            }
            *phase = ServerPhase::Draining;
            // Release a listener that was bound but never served
            drop(self.inner.listener.lock().take());
        }

        self.inner.tracker.start_shutdown();
        self.inner.shutdown.cancel();
        debug!(active = self.inner.tracker.count(), "draining connections");

        let drained = self.inner.tracker.wait_idle(ctx.deadline()).await;
        *self.inner.phase.lock() = ServerPhase::Terminated;

        if drained {
            return Ok(());
        }

        let remaining = self.inner.tracker.count();
        warn!(remaining, "grace period elapsed, force-closing connections");
        self.inner.force_close.cancel();
        Err(Error::ShutdownTimeout {
            grace: ctx.grace(),
            remaining,
        })
    }
}

impl Inner {
    async fn dispatch(
        &self,
        req: Request<Incoming>,
        cancel: CancellationToken,
    ) -> Response<ResponseBody> {
        match self.routes.find(req.uri().path()) {
            Some(Endpoint::Filter) => {
                let ctx = StreamContext::new(self.emitter.clone(), cancel)
                    .body_limit(self.config.body_limit);
                handle_filter(req, ctx).await
            }
            None => response::not_found(),
        }
    }
}

async fn serve_connection(
    inner: Arc<Inner>,
    stream: TcpStream,
    peer: SocketAddr,
    _guard: ConnectionGuard,
) {
    let shutdown = inner.shutdown.clone();
    let force_close = inner.force_close.clone();

    // Emitters on this connection stop when it closes or the server stops
    let conn_cancel = shutdown.child_token();
    let _cancel_on_close = conn_cancel.clone().drop_guard();

    let service = service_fn(move |req| {
        let inner = inner.clone();
        let cancel = conn_cancel.clone();
        async move { Ok::<_, Infallible>(inner.dispatch(req, cancel).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                res = conn.as_mut() => res,
                _ = force_close.cancelled() => {
                    debug!(%peer, "force-closing connection");
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = result {
        // Clients hanging up mid-stream is the normal way streams end
        debug!(%peer, error = %e, "connection closed with error");
    }
}
