//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Relay server
//!
//! The RelayServer owns the listener, the connection registry and the buffer
//! pool. For every accepted stream it wraps a [`Connection`], registers it,
//! and spawns that connection's relay and heartbeat tasks.

use crate::{
    BroadcastRelay, BufferPool, Connection, ConnectionId, ConnectionRegistry, HeartbeatMonitor,
    RelayError, RelayMetrics, Result, ServerConfig, ServerSnapshot,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Broadcast relay server
///
/// # Example
///
/// ```no_run
/// use relaycast_service::{RelayServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = RelayServer::bind(ServerConfig::default().with_port(9000)).await?;
///     server.start()?;
///
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    metrics: Arc<RelayMetrics>,
    listener: std::sync::Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    started_at: Instant,
    running: AtomicBool,
    shutdown: CancellationToken,
    accept_stopped: CancellationToken,
    tasks: TaskTracker,
    accept_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RelayServer {
    /// Bind the listener and build the registry and buffer pool.
    ///
    /// Does not accept connections until [`start`](Self::start) is called.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate().map_err(RelayError::InvalidConfig)?;

        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|source| RelayError::Listen {
                address: config.bind_address,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new(config.write_timeout));
        let pool = Arc::new(BufferPool::new(config.pool));

        info!("Relay server bound to {}", local_addr);

        Ok(Self {
            config,
            registry,
            pool,
            metrics: Arc::new(RelayMetrics::new()),
            listener: std::sync::Mutex::new(Some(listener)),
            local_addr,
            started_at: Instant::now(),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            accept_stopped: CancellationToken::new(),
            tasks: TaskTracker::new(),
            accept_handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Start accepting connections.
    ///
    /// The listener is consumed; a server can be started only once.
    pub fn start(&self) -> Result<()> {
        let listener = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
        .ok_or(RelayError::ServerAlreadyRunning)?;
        self.running.store(true, Ordering::SeqCst);

        info!("Start server success! Accepting connections on {}", self.local_addr);

        let accept = AcceptLoop {
            listener,
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            relay: BroadcastRelay::new(
                self.registry.clone(),
                self.pool.clone(),
                self.metrics.clone(),
                &self.config,
            ),
            monitor: HeartbeatMonitor::new(
                self.config.heartbeat_timeout(),
                self.registry.clone(),
                self.metrics.clone(),
            ),
            shutdown: self.shutdown.clone(),
            stopped: self.accept_stopped.clone(),
            tasks: self.tasks.clone(),
            next_id: AtomicU64::new(1),
        };
        let handle = tokio::spawn(accept.run());

        match self.accept_handle.try_lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(_) => warn!("Accept handle busy, accept loop will not be awaited on shutdown"),
        }
        Ok(())
    }

    /// Start accepting and wait until the accept loop has stopped.
    ///
    /// Returns once [`shutdown`](Self::shutdown) has been called from
    /// another task.
    pub async fn run(&self) -> Result<()> {
        self.start()?;
        self.accept_stopped.cancelled().await;
        Ok(())
    }

    /// Stop accepting, close every connection and stop the buffer pool
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RelayError::ServerNotRunning);
        }

        info!("Shutting down relay server");
        self.shutdown.cancel();

        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        self.registry.shutdown().await;

        self.tasks.close();
        if tokio::time::timeout(Duration::from_secs(5), self.tasks.wait())
            .await
            .is_err()
        {
            warn!("Connection tasks still running after shutdown timeout");
        }

        self.pool.shutdown().await;

        info!("Relay server shutdown complete");
        Ok(())
    }

    /// Check if the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the connection registry
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Get the buffer pool
    pub fn pool(&self) -> Arc<BufferPool> {
        self.pool.clone()
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Get a snapshot of the server state
    pub async fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.registry.len().await,
            total_connections: self.metrics.total_connections(),
            idle_buffers: self.pool.stats().idle,
            bind_address: self.local_addr,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("RelayServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown.cancel();
        }
    }
}

/// State moved into the accept task
struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    relay: BroadcastRelay,
    monitor: HeartbeatMonitor,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    tasks: TaskTracker,
    next_id: AtomicU64,
}

impl AcceptLoop {
    async fn run(self) {
        let _stopped = self.stopped.clone().drop_guard();
        loop {
            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                _ = self.shutdown.cancelled() => break,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                    match Connection::wrap(socket, id) {
                        Ok(conn) => self.admit(Arc::new(conn)).await,
                        Err(e) => {
                            error!(peer_addr = %peer_addr, error = %e, "Failed to wrap connection");
                            self.metrics.accept_error();
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    self.metrics.accept_error();

                    // Back off on errors to avoid tight loop
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Register a connection and start its relay and heartbeat tasks
    async fn admit(&self, conn: Arc<Connection>) {
        let handle = self.registry.register(conn.clone()).await;
        self.metrics.connection_opened();
        info!(connection_id = %conn.id(), "Accept a connect {}", conn.peer_addr());

        let relay = self.relay.clone();
        let reader = conn.clone();
        self.tasks.spawn(async move {
            if let Err(e) = relay.run(reader.clone(), handle).await {
                warn!(connection_id = %reader.id(), error = %e, "Relay for {} stopped", reader.peer_addr());
            }
        });

        // A monitor can outlive its registry entry after the peer hangs up,
        // so it also stops on server shutdown.
        let monitor = self.monitor.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = monitor.watch(conn.clone(), handle) => {}
                _ = shutdown.cancelled() => {
                    let _ = conn.close().await;
                }
            }
        });
    }
}
