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

//! Relaycast broadcast relay server
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=debug relaycast-server 8070
//! ```

use clap::Parser;
use relaycast_service::{DEFAULT_PORT, RelayServer, ServerConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Relaycast broadcast relay server
#[derive(Parser, Debug)]
#[command(name = "relaycast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Seconds between expected heartbeats
    #[arg(long, default_value = "5")]
    heartbeat_secs: u64,

    /// Missed heartbeat intervals before a client is closed
    #[arg(long, default_value = "3")]
    timeout_multiplier: u32,

    /// Seconds an idle read buffer is kept before eviction
    #[arg(long, default_value = "300")]
    buffer_expiry_secs: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig::new(SocketAddr::new(self.bind, self.port))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs))
            .with_timeout_multiplier(self.timeout_multiplier)
            .with_buffer_expiry(Duration::from_secs(self.buffer_expiry_secs))
    }
}

/// Log filter from `RUST_LOG` directives, falling back to `info`
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let server = match RelayServer::bind(args.config()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Start server failed({})!", e);
            return Err(e.into());
        }
    };

    info!("Press Ctrl+C to shutdown");
    let stop = async {
        let signal = tokio::signal::ctrl_c().await;
        info!("{}", server.snapshot().await);
        server.shutdown().await?;
        signal?;
        Ok::<(), Box<dyn std::error::Error>>(())
    };
    let (run, stop) = tokio::join!(server.run(), stop);
    run?;
    stop
}
