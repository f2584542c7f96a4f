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

//! Broadcast relay read loop
//!
//! The relay is responsible for:
//! - Reading frames from a single connection into a pooled buffer
//! - Posting the liveness signal for every frame, heartbeats included
//! - Fanning payload-carrying frames out through the registry
//! - Returning the buffer and unregistering once the stream is gone

use crate::frame::{Frame, format_broadcast};
use crate::{
    BroadcastResult, BufferPool, Connection, ConnectionRegistry, RegistryHandle, RelayMetrics,
    Result, ServerConfig,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Where the read loop pulls frames from
#[async_trait]
pub(crate) trait FrameSource: Send + Sync {
    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize>;
}

#[async_trait]
impl FrameSource for Connection {
    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize> {
        self.read(buf).await
    }
}

/// Per-connection read loop
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    metrics: Arc<RelayMetrics>,
    retry_delay: Duration,
    retry_limit: Option<usize>,
}

impl BroadcastRelay {
    /// Create a relay sharing the server's registry and pool
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        pool: Arc<BufferPool>,
        metrics: Arc<RelayMetrics>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            metrics,
            retry_delay: config.heartbeat_interval,
            retry_limit: config.read_retry_limit,
        }
    }

    /// Run the read loop until the stream is gone.
    ///
    /// Transient read errors are retried on the same buffer after one
    /// heartbeat interval. The loop ends on end-of-stream, on a
    /// stream-closed error, or when the connection is closed by its monitor.
    /// Fails only if no buffer can be acquired.
    pub async fn run(&self, conn: Arc<Connection>, handle: RegistryHandle) -> Result<()> {
        self.run_from(conn.as_ref(), &conn, handle).await
    }

    async fn run_from<S>(&self, source: &S, conn: &Connection, handle: RegistryHandle) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        let peer_addr = conn.peer_addr();
        let mut buffer = self.pool.acquire().await?;
        let mut failures = 0usize;

        loop {
            match source.read_frame(&mut buffer).await {
                Ok(0) => {
                    info!(connection_id = %conn.id(), "{} has been disconnected", peer_addr);
                    break;
                }
                Ok(count) => {
                    failures = 0;
                    conn.mark_activity();
                    self.dispatch(conn, &buffer[..count]).await;
                }
                Err(e) if e.is_stream_closed() => {
                    info!(connection_id = %conn.id(), reason = %e, "{} has been disconnected", peer_addr);
                    break;
                }
                Err(e) => {
                    failures += 1;
                    self.metrics.read_error();
                    warn!(
                        connection_id = %conn.id(),
                        error = %e,
                        attempt = failures,
                        "Read data from {} failed",
                        peer_addr
                    );
                    if self.retry_limit.is_some_and(|limit| failures > limit) {
                        warn!(connection_id = %conn.id(), "Giving up on {} after {} failed reads", peer_addr, failures);
                        break;
                    }
                    sleep(self.retry_delay).await;
                }
            }
        }

        if let Err(e) = self.pool.release(buffer).await {
            debug!(connection_id = %conn.id(), error = %e, "Buffer not returned to pool");
        }
        if self.registry.unregister(handle).await {
            self.metrics.connection_closed();
        }
        Ok(())
    }

    /// Handle one frame read from `conn`.
    ///
    /// Returns `None` for a pure heartbeat, otherwise the outcome of the
    /// fan-out of `"<addr> : <payload>"`.
    pub async fn dispatch(&self, conn: &Connection, raw: &[u8]) -> Option<BroadcastResult> {
        let frame = Frame::decode(raw);
        self.metrics.frame_received(frame.payload().is_some());

        let payload = frame.payload()?;
        let line = format_broadcast(conn.peer_addr(), payload);
        info!(connection_id = %conn.id(), "{}", line);

        let result = self.registry.broadcast(conn.id(), line.as_bytes()).await;
        self.metrics.message_relayed(result.succeeded);
        if result.failed > 0 {
            self.metrics.write_errors(result.failed);
        }
        Some(result)
    }
}
