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

//! Client event handler traits

use async_trait::async_trait;
use std::net::SocketAddr;

/// Client event handler trait
///
/// Implement this trait to receive relayed messages. All methods have
/// default implementations that do nothing.
///
/// # Example
///
/// ```no_run
/// use relaycast_client::ClientHandler;
/// use async_trait::async_trait;
/// use std::net::SocketAddr;
///
/// struct MyHandler;
///
/// #[async_trait]
/// impl ClientHandler for MyHandler {
///     async fn on_message(&self, server: SocketAddr, line: &str) {
///         println!("{} : {}", server, line);
///     }
/// }
/// ```
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Called for each chunk of relayed text read from the server
    ///
    /// Relayed lines have the form `"<sender addr> : <payload>"`.
    async fn on_message(&self, _server: SocketAddr, _line: &str) {}

    /// Called once when the server stops sending
    async fn on_disconnect(&self, _server: SocketAddr) {}
}

/// Callback-based handler implementation
///
/// # Example
///
/// ```no_run
/// use relaycast_client::CallbackHandler;
/// use std::net::SocketAddr;
/// use std::sync::Arc;
///
/// let handler = Arc::new(CallbackHandler {
///     on_message: Some(Box::new(|_server: SocketAddr, line: &str| println!("{}", line))),
///     ..Default::default()
/// });
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    /// Called on relayed text
    pub on_message: Option<Box<dyn Fn(SocketAddr, &str) + Send + Sync + 'static>>,

    /// Called on disconnection
    pub on_disconnect: Option<Box<dyn Fn(SocketAddr) + Send + Sync + 'static>>,
}

#[async_trait]
impl ClientHandler for CallbackHandler {
    async fn on_message(&self, server: SocketAddr, line: &str) {
        if let Some(ref f) = self.on_message {
            f(server, line);
        }
    }

    async fn on_disconnect(&self, server: SocketAddr) {
        if let Some(ref f) = self.on_disconnect {
            f(server);
        }
    }
}
