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

//! Server-side heartbeat monitor
//!
//! One monitor task runs per connection. Each time the relay reads anything
//! from the peer it posts the connection's liveness signal; the monitor
//! waits for that signal with a deadline of `heartbeat_timeout`. A post in
//! time keeps the connection `Alive` and restarts the wait. A missed deadline
//! moves it to `Closed`: the stream is closed and the connection leaves the
//! registry. No other server component closes a connection.

use crate::{Connection, ConnectionRegistry, ConnectionState, RegistryHandle, RelayMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Closes connections that stop sending frames
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl HeartbeatMonitor {
    /// Create a monitor that tolerates `timeout` of silence
    pub fn new(
        timeout: Duration,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            timeout,
            registry,
            metrics,
        }
    }

    /// Get the silence window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Watch a connection until it is closed.
    ///
    /// Returns once the connection has been closed and unregistered. If the
    /// connection was closed elsewhere first, closing again is a no-op.
    pub async fn watch(&self, conn: Arc<Connection>, handle: RegistryHandle) -> ConnectionState {
        let peer_addr = conn.peer_addr();

        loop {
            tokio::select! {
                biased;
                _ = conn.closed() => {
                    debug!(connection_id = %conn.id(), peer_addr = %peer_addr, "Monitor stopping, connection already closed");
                    break;
                }
                result = timeout(self.timeout, conn.activity()) => match result {
                    Ok(()) => trace!(connection_id = %conn.id(), "Heartbeat"),
                    Err(_) => {
                        // The relay unregisters on end-of-stream; that peer left on its own.
                        if !self.registry.contains(handle).await {
                            debug!(connection_id = %conn.id(), "{} already left, releasing stream", peer_addr);
                            if let Err(e) = conn.close().await {
                                debug!(connection_id = %conn.id(), error = %e, "Close failed");
                            }
                            break;
                        }
                        self.metrics.heartbeat_timeout();
                        match conn.close().await {
                            Ok(true) => info!(
                                connection_id = %conn.id(),
                                peer_addr = %peer_addr,
                                timeout = ?self.timeout,
                                "{} has been closed",
                                peer_addr
                            ),
                            Ok(false) => debug!(connection_id = %conn.id(), "Connection was already closed"),
                            Err(e) => warn!(
                                connection_id = %conn.id(),
                                peer_addr = %peer_addr,
                                error = %e,
                                "Close {} failed",
                                peer_addr
                            ),
                        }
                        break;
                    }
                },
            }
        }

        if self.registry.unregister(handle).await {
            self.metrics.connection_closed();
        }
        ConnectionState::Closed
    }
}
