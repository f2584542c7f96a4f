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

//! Relay client implementation
//!
//! A session runs two background tasks over one [`Connection`]:
//!
//! - the reader, which hands every chunk read from the server to the
//!   [`ClientHandler`]
//! - the heartbeat, which writes a bare `*` whenever the session has been
//!   idle for `heartbeat_interval` and reports the first failed write

use crate::{ClientConfig, ClientError, ClientHandler, Result};
use relaycast_service::{Connection, ConnectionId, Frame};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Relay client
#[derive(Debug, Clone)]
pub struct RelayClient {
    config: ClientConfig,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the server and start the session's reader and heartbeat
    pub async fn connect<H: ClientHandler>(&self, handler: Arc<H>) -> Result<ClientSession> {
        self.config.validate().map_err(ClientError::InvalidConfig)?;
        let address = self.config.address();
        info!("Connecting to {}...", address);

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::Connect { address, source }),
            Err(_) => return Err(ClientError::ConnectTimeout(address)),
        };
        let local_addr = stream.local_addr()?;
        let conn = Arc::new(Connection::wrap(stream, ConnectionId::new(0))?);
        let server_addr = conn.peer_addr();

        info!("Connected to {}", server_addr);

        let failure = Arc::new(HeartbeatFailure::new());
        let reader = tokio::spawn(read_loop(
            conn.clone(),
            handler,
            self.config.buffer_size,
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            conn.clone(),
            self.config.heartbeat_interval,
            failure.clone(),
        ));

        Ok(ClientSession {
            config: self.config.clone(),
            conn,
            local_addr,
            failure,
            reader,
            heartbeat,
        })
    }
}

/// An open connection to the relay server
///
/// Dropping the session stops its background tasks and closes the socket.
pub struct ClientSession {
    config: ClientConfig,
    conn: Arc<Connection>,
    local_addr: SocketAddr,
    failure: Arc<HeartbeatFailure>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl ClientSession {
    /// Send a message to every other client in the room.
    ///
    /// Messages longer than `max_message_len` are rejected without touching
    /// the socket. A successful send postpones the next heartbeat.
    pub async fn send(&self, text: &str) -> Result<()> {
        let max = self.config.max_message_len;
        let frame = Frame::encode_message(text, max.saturating_add(1)).map_err(|_| {
            ClientError::MessageTooLong {
                len: text.len(),
                max,
            }
        })?;

        self.conn.mark_activity();
        self.conn.send(&frame).await?;
        trace!(len = text.len(), "Message sent");
        Ok(())
    }

    /// Wait until a heartbeat write fails, returning the write error.
    ///
    /// Never resolves while the server keeps accepting heartbeats.
    pub async fn heartbeat_failed(&self) -> ClientError {
        let mut flag = self.failure.flag.subscribe();
        if flag.wait_for(|failed| *failed).await.is_err() {
            return ClientError::ConnectionClosed;
        }
        self.failure.take().unwrap_or(ClientError::ConnectionClosed)
    }

    /// Wait until the session is closed, locally or by a failed heartbeat
    pub async fn closed(&self) {
        self.conn.closed().await
    }

    /// Close the session
    pub async fn close(&self) -> Result<()> {
        if self.conn.close().await? {
            info!("Disconnected from {}", self.conn.peer_addr());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("server_addr", &self.conn.peer_addr())
            .field("local_addr", &self.local_addr)
            .field("closed", &self.conn.is_closed())
            .finish()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

/// First heartbeat error, published once
struct HeartbeatFailure {
    error: Mutex<Option<ClientError>>,
    flag: watch::Sender<bool>,
}

impl HeartbeatFailure {
    fn new() -> Self {
        Self {
            error: Mutex::new(None),
            flag: watch::Sender::new(false),
        }
    }

    fn publish(&self, error: ClientError) {
        match self.error.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
        self.flag.send_replace(true);
    }

    fn take(&self) -> Option<ClientError> {
        match self.error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

async fn read_loop<H: ClientHandler>(conn: Arc<Connection>, handler: Arc<H>, buffer_size: usize) {
    let server = conn.peer_addr();
    let mut buf = vec![0u8; buffer_size];

    loop {
        match conn.read(&mut buf).await {
            Ok(0) => {
                info!("Server {} closed the connection", server);
                break;
            }
            Ok(n) => {
                let line = String::from_utf8_lossy(&buf[..n]);
                handler.on_message(server, &line).await;
            }
            Err(e) => {
                debug!(error = %e, "Read from {} stopped", server);
                break;
            }
        }
    }

    // The heartbeat detects the dead socket and reports it.
    handler.on_disconnect(server).await;
}

async fn heartbeat_loop(conn: Arc<Connection>, interval: Duration, failure: Arc<HeartbeatFailure>) {
    let heartbeat = Frame::encode_heartbeat();

    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break,
            idle = timeout(interval, conn.activity()) => {
                if idle.is_ok() {
                    continue;
                }
                match conn.send(&heartbeat).await {
                    Ok(()) => trace!("Heartbeat sent"),
                    Err(e) => {
                        warn!(error = %e, "Has been disconnected from the server!");
                        let _ = conn.close().await;
                        failure.publish(ClientError::Heartbeat(e));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallbackHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    async fn listen() -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ClientConfig::new("127.0.0.1", port))
    }

    fn recording_handler() -> (Arc<CallbackHandler>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = CallbackHandler {
            on_message: Some(Box::new(move |_server: SocketAddr, line: &str| {
                let _ = tx.send(line.to_string());
            })),
            ..Default::default()
        };
        (Arc::new(handler), rx)
    }

    #[tokio::test]
    async fn test_send_prefixes_marker() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config);
        let (handler, _rx) = recording_handler();

        let session = client.connect(handler).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        session.send("hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*hello");
    }

    #[tokio::test]
    async fn test_send_rejects_long_message() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config.with_max_message_len(4));
        let (handler, _rx) = recording_handler();

        let session = client.connect(handler).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        let err = session.send("too long").await.unwrap_err();
        assert!(matches!(err, ClientError::MessageTooLong { len: 8, max: 4 }));
        session.send("fits").await.unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_message_len_does_not_overflow() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config.with_max_message_len(usize::MAX));
        let (handler, _rx) = recording_handler();

        let session = client.connect(handler).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        session.send("anything goes").await.unwrap();

        let mut buf = [0u8; 32];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*anything goes");
    }

    #[tokio::test]
    async fn test_connect_rejects_zero_heartbeat() {
        let (_listener, config) = listen().await;
        let client = RelayClient::new(config.with_heartbeat_interval(Duration::ZERO));
        let (handler, _rx) = recording_handler();

        let err = client.connect(handler).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_idle_session_sends_heartbeat() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config.with_heartbeat_interval(Duration::from_millis(50)));
        let (handler, _rx) = recording_handler();

        let _session = client.connect(handler).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(1), server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"*");
    }

    #[tokio::test]
    async fn test_inbound_text_reaches_handler() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config);
        let (handler, mut rx) = recording_handler();

        let _session = client.connect(handler).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        server.write_all(b"127.0.0.1:1234 : hi").await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "127.0.0.1:1234 : hi");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_heartbeat_failure_is_reported() {
        let (listener, config) = listen().await;
        let client = RelayClient::new(config.with_heartbeat_interval(Duration::from_millis(50)));
        let (handler, _rx) = recording_handler();

        let session = client.connect(handler).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);
        drop(listener);

        let err = tokio::time::timeout(Duration::from_secs(2), session.heartbeat_failed())
            .await
            .expect("heartbeat never failed");
        assert!(matches!(err, ClientError::Heartbeat(_)));
        assert!(session.is_closed());
        assert!(logs_contain("Has been disconnected from the server!"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, config) = listen().await;
        drop(listener);

        let client = RelayClient::new(config);
        let (handler, _rx) = recording_handler();
        let err = client.connect(handler).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
