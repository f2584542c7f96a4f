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

//! Connection registry
//!
//! The registry is responsible for:
//! - Tracking every live connection
//! - Fanning a relayed message out to every member but its sender
//! - Closing all members on server shutdown
//!
//! Membership changes take the write lock. A broadcast holds the read lock
//! for its whole scan, so broadcasts may overlap each other but never overlap
//! a registration or removal.

use crate::{Connection, ConnectionId, RelayError};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Opaque handle returned by [`ConnectionRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryHandle(ConnectionId);

impl RegistryHandle {
    /// ID of the registered connection
    pub fn id(&self) -> ConnectionId {
        self.0
    }
}

/// Result of a broadcast operation
#[derive(Debug, Clone)]
pub struct BroadcastResult {
    /// Number of recipients attempted (every member but the sender)
    pub total: usize,
    /// Number of successful sends
    pub succeeded: usize,
    /// Number of failed sends
    pub failed: usize,
    /// Errors that occurred (ConnectionId and error message)
    pub errors: Vec<(ConnectionId, String)>,
}

impl BroadcastResult {
    fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    /// Check if all writes succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Concurrency-safe set of live connections
pub struct ConnectionRegistry {
    members: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    write_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create an empty registry
    ///
    /// `write_timeout` bounds each per-recipient write during a broadcast.
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Add a connection
    pub async fn register(&self, connection: Arc<Connection>) -> RegistryHandle {
        let id = connection.id();
        self.members.write().await.insert(id, connection);
        debug!(connection_id = %id, "Registered connection");
        RegistryHandle(id)
    }

    /// Remove a connection
    ///
    /// Returns `false` if it was already removed.
    pub async fn unregister(&self, handle: RegistryHandle) -> bool {
        let removed = self.members.write().await.remove(&handle.0).is_some();
        if removed {
            debug!(connection_id = %handle.0, "Unregistered connection");
        }
        removed
    }

    /// Write `payload` to every member except `sender`.
    ///
    /// A failed write is logged and counted. It never removes the member;
    /// the heartbeat monitor owns removal.
    pub async fn broadcast(&self, sender: ConnectionId, payload: &[u8]) -> BroadcastResult {
        let mut result = BroadcastResult::new();
        let members = self.members.read().await;

        let sends = members
            .values()
            .filter(|conn| conn.id() != sender)
            .map(|conn| {
                let conn = conn.clone();
                async move {
                    let outcome = match timeout(self.write_timeout, conn.send(payload)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(RelayError::WriteTimeout(conn.id())),
                    };
                    (conn, outcome)
                }
            })
            .collect::<Vec<_>>();
        result.total = sends.len();

        for (conn, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    warn!(
                        connection_id = %conn.id(),
                        peer_addr = %conn.peer_addr(),
                        error = %e,
                        "Broadcast write failed, skipping recipient"
                    );
                    result.failed += 1;
                    result.errors.push((conn.id(), e.to_string()));
                }
            }
        }

        result
    }

    /// Check whether a handle is still registered
    pub async fn contains(&self, handle: RegistryHandle) -> bool {
        self.members.read().await.contains_key(&handle.0)
    }

    /// Get all registered connection IDs
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.members.read().await.keys().copied().collect()
    }

    /// Get the number of registered connections
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Check whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Close and remove every member
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.members.write().await.drain().collect();
        for (id, conn) in drained {
            if let Err(e) = conn.close().await {
                debug!(connection_id = %id, error = %e, "Close during shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn create_test_connection(id: u64) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });

        let (server, _) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();

        let conn = Connection::wrap(server, ConnectionId::new(id)).unwrap();
        (Arc::new(conn), client)
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (conn, _client) = create_test_connection(1).await;

        let handle = registry.register(conn).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(handle).await);
        assert_eq!(handle.id(), ConnectionId::new(1));

        assert!(registry.unregister(handle).await);
        assert!(!registry.unregister(handle).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));

        let mut clients = Vec::new();
        for i in 1..=3 {
            let (conn, client) = create_test_connection(i).await;
            registry.register(conn).await;
            clients.push(client);
        }

        let result = registry.broadcast(ConnectionId::new(1), b"hello").await;
        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, 2);
        assert!(result.all_succeeded());

        for client in clients.iter_mut().skip(1) {
            let mut buf = [0u8; 16];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hello");
        }
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_remove() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (sender, _sender_client) = create_test_connection(1).await;
        let (closed, _closed_client) = create_test_connection(2).await;

        registry.register(sender).await;
        let handle = registry.register(closed.clone()).await;
        closed.close().await.unwrap();

        let result = registry.broadcast(ConnectionId::new(1), b"hello").await;
        assert_eq!(result.total, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].0, ConnectionId::new(2));
        assert!(registry.contains(handle).await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_members() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (conn, _client) = create_test_connection(1).await;
        registry.register(conn.clone()).await;

        registry.shutdown().await;

        assert!(registry.is_empty().await);
        assert!(conn.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_under_membership_churn() {
        const ROUNDS: usize = 25;
        const BROADCASTERS: usize = 4;
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(5)));

        let (sender, mut sender_client) = create_test_connection(0).await;
        registry.register(sender.clone()).await;
        let mut conns = vec![sender];
        let mut clients = Vec::new();

        for id in 1..=3 {
            let (conn, client) = create_test_connection(id).await;
            registry.register(conn.clone()).await;
            conns.push(conn);
            clients.push(client);
        }

        let mut churners = Vec::new();
        for id in 4..=7 {
            let (conn, client) = create_test_connection(id).await;
            conns.push(conn.clone());
            clients.push(client);
            let registry = registry.clone();
            churners.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let handle = registry.register(conn.clone()).await;
                    tokio::task::yield_now().await;
                    assert!(registry.unregister(handle).await);
                    tokio::task::yield_now().await;
                }
            }));
        }

        let broadcasters = (0..BROADCASTERS)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut results = Vec::new();
                    for _ in 0..ROUNDS {
                        results.push(registry.broadcast(ConnectionId::new(0), b"m;").await);
                    }
                    results
                })
            })
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for broadcaster in broadcasters {
            for result in broadcaster.await.unwrap() {
                // Three fixed members plus however many churners were in.
                assert!((3..=7).contains(&result.total), "total {}", result.total);
                assert_eq!(result.succeeded, result.total);
                delivered += result.succeeded;
            }
        }
        for churner in churners {
            churner.await.unwrap();
        }
        assert_eq!(registry.len().await, 4);

        for conn in &conns {
            conn.close().await.unwrap();
        }

        let mut received = 0;
        for (index, client) in clients.iter_mut().enumerate() {
            let mut data = Vec::new();
            client.read_to_end(&mut data).await.unwrap();
            let count = data.iter().filter(|&&byte| byte == b';').count();
            if index < 3 {
                assert_eq!(count, ROUNDS * BROADCASTERS);
            }
            received += count;
        }
        assert_eq!(received, delivered);

        let mut data = Vec::new();
        sender_client.read_to_end(&mut data).await.unwrap();
        assert!(data.is_empty());
    }
}
