//! TCP server and its lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::connections::ConnectionSet;
use super::metrics::ServerMetrics;
use super::session::handle_connection;
use crate::config::Settings;
use crate::error::{TransportError, TransportResult};
use crate::handlers::{Handler, HandlerRegistry};
use crate::transport::{Connection, ConnectionOptions};

/// Message-dispatch server.
///
/// Lifecycle is `CREATED -> RUNNING -> STOPPED`; `restart_server` goes
/// from either state back to `RUNNING`. Handlers are registered before the
/// server starts and the registry is read-only while it runs.
pub struct Server {
    settings: Arc<Settings>,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<ServerMetrics>,
    connections: Arc<ConnectionSet>,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Created,
    Running(RunningState),
    Stopped,
}

struct RunningState {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    sessions: TaskTracker,
}

/// Everything the accept loop needs, moved into its task.
struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<ServerMetrics>,
    connections: Arc<ConnectionSet>,
    connection_semaphore: Arc<Semaphore>,
    max_connections: usize,
    options: ConnectionOptions,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Server {
    /// Create a server with its own metrics.
    pub fn new(settings: Arc<Settings>, registry: HandlerRegistry) -> Self {
        Self::with_metrics(settings, registry, Arc::new(ServerMetrics::new()))
    }

    /// Create a server sharing `metrics`, e.g. with a status handler.
    pub fn with_metrics(
        settings: Arc<Settings>,
        registry: HandlerRegistry,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            settings,
            registry: Arc::new(registry),
            connections: Arc::new(ConnectionSet::new(Arc::clone(&metrics))),
            metrics,
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Register a handler. Fails with `AlreadyRunning` once the server has started.
    pub fn register<H>(&mut self, message_type: impl Into<String>, handler: H) -> TransportResult<()>
    where
        H: Handler + 'static,
    {
        if self.is_server_running() {
            return Err(TransportError::AlreadyRunning);
        }
        Arc::make_mut(&mut self.registry).register(message_type, handler)
    }

    /// Bind the listening socket and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start_server(&self) -> TransportResult<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(TransportError::AlreadyRunning);
        }

        let state = self.launch().await?;
        let local_addr = state.local_addr;
        *lifecycle = Lifecycle::Running(state);
        Ok(local_addr)
    }

    /// Stop accepting, close every open connection and wait for their tasks.
    pub async fn stop_server(&self) -> TransportResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(state) => {
                self.shutdown(state).await;
                Ok(())
            }
            previous => {
                *lifecycle = previous;
                Err(TransportError::NotRunning)
            }
        }
    }

    /// Stop the server if it is running, then start it again.
    pub async fn restart_server(&self) -> TransportResult<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Running(state) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            self.shutdown(state).await;
        }

        info!("Restarting server");
        let state = self.launch().await?;
        let local_addr = state.local_addr;
        *lifecycle = Lifecycle::Running(state);
        Ok(local_addr)
    }

    pub fn is_server_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of currently open client connections.
    pub fn connected_clients_count(&self) -> usize {
        self.connections.len()
    }

    /// Address the server is listening on, if running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(state) => Some(state.local_addr),
            _ => None,
        }
    }

    /// Get server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Bind and spawn the accept loop. Caller holds the lifecycle lock.
    async fn launch(&self) -> TransportResult<RunningState> {
        let address = self.settings.server.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| TransportError::bind(address.as_str(), e))?;
        let local_addr = listener.local_addr()?;

        let max_connections = self.settings.limits.max_connections;
        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();

        let accept_loop = AcceptLoop {
            listener,
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            connections: Arc::clone(&self.connections),
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            options: ConnectionOptions::from_settings(&self.settings),
            shutdown: shutdown.clone(),
            sessions: sessions.clone(),
        };
        let accept_task = tokio::spawn(accept_client_connections(accept_loop));

        self.metrics.mark_started();
        self.running.store(true, Ordering::SeqCst);
        info!(
            address = %local_addr,
            handlers = self.registry.len(),
            max_connections,
            "Server listening"
        );

        Ok(RunningState {
            local_addr,
            shutdown,
            accept_task,
            sessions,
        })
    }

    async fn shutdown(&self, state: RunningState) {
        self.running.store(false, Ordering::SeqCst);
        state.shutdown.cancel();
        if let Err(e) = state.accept_task.await {
            error!(error = %e, "Accept loop ended abnormally");
        }

        let closed = self.connections.close_all();
        state.sessions.close();

        let drain_timeout = self.settings.limits.shutdown_timeout();
        match timeout(drain_timeout, state.sessions.wait()).await {
            Ok(()) => info!(closed, "Server stopped"),
            Err(_) => warn!(
                closed,
                "Shutdown timeout after {}s, some sessions are still unwinding",
                drain_timeout.as_secs()
            ),
        }
        self.metrics.mark_stopped();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Lifecycle::Running(state) = self.lifecycle.get_mut() {
            state.shutdown.cancel();
            self.connections.close_all();
        }
    }
}

/// Accept loop: runs until the shutdown token is cancelled.
async fn accept_client_connections(ctx: AcceptLoop) {
    debug!("Accept loop running, waiting for connections...");

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                debug!("Shutdown requested, stopping accept loop");
                break;
            }
            result = ctx.listener.accept() => {
                match result {
                    Ok((stream, peer)) => ctx.admit(stream, peer),
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                }
            }
        }
    }
}

impl AcceptLoop {
    /// Start a session for an accepted socket, or drop it when over the limit.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        // Try to acquire a connection permit
        let permit = match Arc::clone(&self.connection_semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_rejected();
                warn!(
                    peer = %peer,
                    max = self.max_connections,
                    "Connection limit reached, rejecting connection"
                );
                return;
            }
        };

        let connection = match Connection::new(stream, self.options) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to set up connection");
                return;
            }
        };

        self.connections.insert(connection.clone());
        info!(
            connection_id = %connection.id(),
            peer = %peer,
            active = self.connections.len(),
            "New connection accepted"
        );

        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let connections = Arc::clone(&self.connections);

        self.sessions.spawn(async move {
            let _permit = permit; // Dropped when the session ends, releasing the slot
            let id = connection.id();

            if let Err(e) = handle_connection(connection.clone(), registry, metrics).await {
                warn!(connection_id = %id, error = %e, "Connection handler error");
            }

            connection.close();
            connections.remove(id);
            info!(
                connection_id = %id,
                active = connections.len(),
                "Connection closed"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_settings() -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.server.port = 0;
        Arc::new(settings)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let server = Server::new(local_settings(), HandlerRegistry::new());
        assert!(!server.is_server_running());
        assert!(matches!(server.stop_server().await, Err(TransportError::NotRunning)));

        let addr = server.start_server().await.unwrap();
        assert!(server.is_server_running());
        assert_eq!(server.local_addr().await, Some(addr));
        assert!(matches!(
            server.start_server().await,
            Err(TransportError::AlreadyRunning)
        ));

        server.stop_server().await.unwrap();
        assert!(!server.is_server_running());
        assert_eq!(server.local_addr().await, None);
        assert!(TcpStream::connect(addr).await.is_err());

        server.restart_server().await.unwrap();
        assert!(server.is_server_running());
        server.restart_server().await.unwrap();
        assert!(server.is_server_running());
        server.stop_server().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_error() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = Settings::default();
        settings.server.port = occupied.local_addr().unwrap().port();

        let server = Server::new(Arc::new(settings), HandlerRegistry::new());
        assert!(matches!(
            server.start_server().await,
            Err(TransportError::Bind { .. })
        ));
        assert!(!server.is_server_running());
    }

    #[tokio::test]
    async fn test_register_rejected_while_running() {
        let mut server = Server::new(local_settings(), HandlerRegistry::new());
        server
            .register("PING", crate::handlers::system::PingHandler)
            .unwrap();
        server.start_server().await.unwrap();

        assert!(matches!(
            server.register("ECHO", crate::handlers::system::PingHandler),
            Err(TransportError::AlreadyRunning)
        ));

        server.stop_server().await.unwrap();
        server
            .register("ECHO", crate::handlers::system::PingHandler)
            .unwrap();
        assert!(server.registry().contains("ECHO"));
    }
}
