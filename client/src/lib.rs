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

//! # Relaycast Client
//!
//! Client library for the relaycast broadcast relay.
//!
//! ## Features
//!
//! - **Heartbeat** - A bare `*` is sent whenever the session has been idle for
//!   the heartbeat interval, keeping the server from closing it
//! - **Length checks** - Oversized messages are rejected before they are sent
//! - **Event-Driven** - Handler-based API for relayed messages
//!
//! ## Quick Start
//!
//! ```no_run
//! use relaycast_client::{ClientConfig, ClientHandler, RelayClient};
//! use async_trait::async_trait;
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl ClientHandler for MyHandler {
//!     async fn on_message(&self, server: SocketAddr, line: &str) {
//!         println!("{} : {}", server, line);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RelayClient::new(ClientConfig::new("127.0.0.1", 8070));
//!     let session = client.connect(Arc::new(MyHandler)).await?;
//!
//!     session.send("hello").await?;
//!
//!     let error = session.heartbeat_failed().await;
//!     eprintln!("{}", error);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod handler;

pub use client::{ClientSession, RelayClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use handler::{CallbackHandler, ClientHandler};
