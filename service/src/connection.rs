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

//! Framed connection
//!
//! A [`Connection`] owns both halves of an accepted TCP stream together with
//! the connection's liveness signal. It is shared (behind an `Arc`) by exactly
//! two tasks: the broadcast relay that reads from it and the heartbeat monitor
//! that watches it. The registry holds a third reference so that other
//! connections' relays can write to it.

use crate::{ConnectionId, ConnectionState, RelayError, Result};
use metrics::counter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// An accepted client stream plus its liveness signal
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,

    // Read half is only ever locked by the relay task.
    reader: Mutex<Option<OwnedReadHalf>>,
    // Holding the lock for a whole write keeps frames from interleaving.
    writer: Mutex<Option<OwnedWriteHalf>>,

    // Single stored permit: posting twice before a check counts once.
    activity: Notify,
    closed: CancellationToken,
    state: AtomicU8,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl Connection {
    /// Wrap an accepted TCP stream
    #[instrument(skip(socket), fields(connection_id = %id))]
    pub fn wrap(socket: TcpStream, id: ConnectionId) -> Result<Self> {
        let peer_addr = socket.peer_addr()?;
        let (reader, writer) = socket.into_split();

        debug!(peer_addr = %peer_addr, "Wrapped connection");

        Ok(Self {
            id,
            peer_addr,
            created_at: Instant::now(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            activity: Notify::new(),
            closed: CancellationToken::new(),
            state: AtomicU8::new(ConnectionState::Alive.as_u8()),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        })
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get when the connection was accepted
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get the current liveness state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Get bytes written to the peer
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes read from the peer
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get frames written to the peer
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Get frames read from the peer
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Write one logical message to the peer.
    ///
    /// Concurrent callers are serialized so two messages never interleave on
    /// the wire. Fails with [`RelayError::ConnectionClosed`] once the
    /// connection has been closed, including when the close happens while
    /// this write is pending, and when the peer has gone away.
    #[instrument(level = "trace", skip(self, bytes), fields(connection_id = %self.id, len = bytes.len()))]
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RelayError::ConnectionClosed)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(RelayError::ConnectionClosed),
            result = writer.write_all(bytes) => result.map_err(stream_gone_as_closed)?,
        }

        self.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        counter!("relaycast.bytes.sent").increment(bytes.len() as u64);

        trace!("Frame sent");
        Ok(())
    }

    /// Read one frame into `buf`.
    ///
    /// Returns `Ok(0)` when the peer has closed its side. Returns
    /// [`RelayError::ConnectionClosed`] once the connection has been closed
    /// locally, waking a read that is already pending.
    #[instrument(level = "trace", skip(self, buf), fields(connection_id = %self.id))]
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(RelayError::ConnectionClosed)?;

        let count = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                guard.take();
                return Err(RelayError::ConnectionClosed);
            }
            result = reader.read(buf) => result?,
        };

        if count > 0 {
            self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
            self.frames_received.fetch_add(1, Ordering::Relaxed);
            counter!("relaycast.bytes.received").increment(count as u64);
        }
        Ok(count)
    }

    /// Post the liveness signal.
    ///
    /// Never blocks. If a post is already pending, this one is absorbed.
    pub fn mark_activity(&self) {
        self.activity.notify_one();
    }

    /// Wait for the next liveness post.
    pub async fn activity(&self) {
        self.activity.notified().await;
    }

    /// Wait until the connection has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Close the connection.
    ///
    /// The stream is released exactly once. Returns `Ok(true)` for the call
    /// that closed it and `Ok(false)` for every later call. An error means
    /// the write half could not be shut down cleanly; the connection is
    /// closed regardless.
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn close(&self) -> Result<bool> {
        let previous = self.state.compare_exchange(
            ConnectionState::Alive.as_u8(),
            ConnectionState::Closed.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_err() {
            return Ok(false);
        }

        // Wakes a pending read or write so their locks are released.
        self.closed.cancel();

        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }

        debug!(peer_addr = %self.peer_addr, "Connection closed");
        Ok(true)
    }
}

/// Report a reset or broken stream as a closed connection
fn stream_gone_as_closed(error: std::io::Error) -> RelayError {
    let error = RelayError::Io(error);
    if error.is_stream_closed() {
        RelayError::ConnectionClosed
    } else {
        error
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}
