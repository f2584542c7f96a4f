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

//! Client error types

use relaycast_service::RelayError;
use std::io;
use thiserror::Error;

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server could not be reached
    #[error("Connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection attempt timed out
    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Message rejected before sending
    #[error("Message too long! {len} bytes exceeds maximum of {max}")]
    MessageTooLong { len: usize, max: usize },

    /// Heartbeat write failed; the server is gone
    #[error("Heartbeat failed: {0}")]
    Heartbeat(#[source] RelayError),
}

impl ClientError {
    /// Check if this error means the server can no longer be reached
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed | ClientError::Heartbeat(_) | ClientError::Io(_)
        )
    }
}

impl From<RelayError> for ClientError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Io(e) => ClientError::Io(e),
            _ => ClientError::ConnectionClosed,
        }
    }
}
