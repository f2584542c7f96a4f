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

//! Single-room TCP broadcast relay
//!
//! Every client connected to the server is a member of one room. Each frame a
//! client sends is prefixed with the sender's address and written to every
//! other member. Clients that go quiet for longer than the heartbeat timeout
//! are closed and removed.
//!
//! # Architecture
//!
//! ```text
//! RelayServer
//!     ↓
//! ConnectionRegistry ← HeartbeatMonitor (one task per connection)
//!     ↓
//! BroadcastRelay (one task per connection) → Connection
//!     ↓
//! BufferPool
//! ```
//!
//! # Wire format
//!
//! A frame is one marker byte followed by an optional payload. A frame of
//! just `*` is a heartbeat. The server always drops the first byte, and
//! relays `"<sender addr> : <payload>"` when anything remains.
//!
//! # Example
//!
//! ```no_run
//! use relaycast_service::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::bind(ServerConfig::default()).await?;
//!     server.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod frame;
mod heartbeat;
mod metrics;
mod pool;
mod registry;
mod relay;
mod server;
mod types;

pub use config::{
    DEFAULT_BUFFER_EXPIRY, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_PORT, DEFAULT_TIMEOUT_MULTIPLIER,
    PoolConfig, ServerConfig,
};
pub use connection::Connection;
pub use error::{RelayError, Result};
pub use frame::{DEFAULT_FRAME_SIZE, Frame, HEARTBEAT_MARKER, format_broadcast};
pub use heartbeat::HeartbeatMonitor;
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use pool::{Buffer, BufferPool, PoolStats};
pub use registry::{BroadcastResult, ConnectionRegistry, RegistryHandle};
pub use relay::BroadcastRelay;
pub use server::RelayServer;
pub use types::{ConnectionId, ConnectionState, ServerSnapshot};
