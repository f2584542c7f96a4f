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

//! Shared fixtures for end-to-end relay scenarios
//!
//! Starts a [`RelayServer`] on an ephemeral loopback port and connects
//! [`RelayClient`] sessions to it whose relayed lines are recorded.

use async_trait::async_trait;
use relaycast_client::{ClientConfig, ClientHandler, ClientSession, RelayClient};
use relaycast_service::{RelayServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};

/// Handler that records every relayed line
pub struct RecordingHandler {
    lines_tx: mpsc::UnboundedSender<String>,
    lines_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    disconnected: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        Self {
            lines_tx,
            lines_rx: Mutex::new(lines_rx),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Wait up to `wait` for the next relayed line
    pub async fn next_line(&self, wait: Duration) -> Option<String> {
        let mut rx = self.lines_rx.lock().await;
        timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Check that nothing is relayed within `wait`
    pub async fn is_quiet(&self, wait: Duration) -> bool {
        self.next_line(wait).await.is_none()
    }

    /// Check whether the server has stopped sending
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientHandler for RecordingHandler {
    async fn on_message(&self, _server: SocketAddr, line: &str) {
        let _ = self.lines_tx.send(line.to_string());
    }

    async fn on_disconnect(&self, _server: SocketAddr) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Server configuration bound to an ephemeral loopback port
pub fn loopback_config() -> ServerConfig {
    ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// Bind and start a server
pub async fn start_server(config: ServerConfig) -> RelayServer {
    let server = RelayServer::bind(config).await.expect("bind relay server");
    server.start().expect("start relay server");
    server
}

/// Client configuration pointing at `server`
pub fn client_config(server: &RelayServer) -> ClientConfig {
    let addr = server.local_addr();
    ClientConfig::new(addr.ip().to_string(), addr.port())
}

/// Connect a client session with a recording handler
pub async fn connect(config: ClientConfig) -> (ClientSession, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::new());
    let session = RelayClient::new(config)
        .connect(handler.clone())
        .await
        .expect("connect client");
    (session, handler)
}

/// Wait until the server has registered exactly `count` connections
pub async fn wait_for_connections(server: &RelayServer, count: usize) {
    timeout(Duration::from_secs(5), async {
        while server.connection_count().await != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never reached");
}
