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

//! Error types for the relay service

use crate::types::ConnectionId;
use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay service error types
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listener could not be bound. Fatal at startup.
    #[error("Failed to listen on {address}: {source}")]
    Listen {
        /// Address the server tried to bind
        address: SocketAddr,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// A write to a connection did not complete in time
    #[error("Write to {0} timed out")]
    WriteTimeout(ConnectionId),

    /// The buffer pool has been shut down
    #[error("Buffer pool closed")]
    PoolClosed,

    /// Outgoing frame does not fit in a single read buffer
    #[error("Frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Encoded frame length
        len: usize,
        /// Maximum frame length
        max: usize,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server is already accepting connections
    #[error("Server already running")]
    ServerAlreadyRunning,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,
}

impl RelayError {
    /// Check whether the error means the stream is gone for good
    ///
    /// Stream-closed errors end a connection's read loop. Anything else is
    /// treated as transient and the read is retried.
    pub fn is_stream_closed(&self) -> bool {
        match self {
            RelayError::ConnectionClosed => true,
            RelayError::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
