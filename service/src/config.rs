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

//! Server and buffer pool configuration
//!
//! # Example
//!
//! ```
//! use relaycast_service::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::default()
//!     .with_port(9000)
//!     .with_heartbeat_interval(Duration::from_secs(2))
//!     .with_buffer_expiry(Duration::from_secs(60));
//!
//! assert_eq!(config.heartbeat_timeout(), Duration::from_secs(6));
//! ```

use crate::frame::DEFAULT_FRAME_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8070;

/// Default interval between client heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Number of heartbeat intervals a connection may stay silent
pub const DEFAULT_TIMEOUT_MULTIPLIER: u32 = 3;

/// Default idle time after which a pooled buffer is evicted
pub const DEFAULT_BUFFER_EXPIRY: Duration = Duration::from_secs(300);

/// Buffer pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Capacity of every buffer handed out by the pool
    pub buffer_size: usize,

    /// Idle time after which a free buffer is evicted.
    ///
    /// Also the interval of the eviction sweep.
    pub expiry: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_FRAME_SIZE,
            expiry: DEFAULT_BUFFER_EXPIRY,
        }
    }
}

impl PoolConfig {
    /// Set the buffer capacity
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the eviction window
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

/// Server configuration
///
/// Use the builder pattern methods to customize the configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Interval at which clients are expected to send a heartbeat.
    ///
    /// Also the delay before a failed read is retried.
    pub heartbeat_interval: Duration,

    /// Number of heartbeat intervals without activity before a connection
    /// is closed
    pub timeout_multiplier: u32,

    /// Timeout for a single broadcast write
    ///
    /// A recipient that cannot take a frame within this duration is skipped.
    pub write_timeout: Duration,

    /// Maximum number of consecutive transient read failures before the
    /// read loop gives up. `None` retries until the connection is closed.
    pub read_retry_limit: Option<usize>,

    /// Read buffer pool settings
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            write_timeout: Duration::from_secs(10),
            read_retry_limit: None,
            pool: PoolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Listen on all interfaces at the given port
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the number of silent heartbeat intervals tolerated
    pub fn with_timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    /// Set the broadcast write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Bound the number of consecutive read retries
    pub fn with_read_retry_limit(mut self, limit: Option<usize>) -> Self {
        self.read_retry_limit = limit;
        self
    }

    /// Set the read buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.pool.buffer_size = size;
        self
    }

    /// Set the idle buffer expiry window
    pub fn with_buffer_expiry(mut self, expiry: Duration) -> Self {
        self.pool.expiry = expiry;
        self
    }

    /// Time a connection may stay silent before the server closes it
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_multiplier
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat_interval must be greater than 0".to_string());
        }

        if self.timeout_multiplier == 0 {
            return Err("timeout_multiplier must be greater than 0".to_string());
        }

        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }

        if self.pool.buffer_size < 2 {
            return Err("buffer_size must hold a marker and at least one byte".to_string());
        }

        if self.pool.expiry.is_zero() {
            return Err("buffer expiry must be greater than 0".to_string());
        }

        Ok(())
    }
}
