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

//! Interactive relay client
//!
//! Reads lines from stdin and sends each to the room; prints every line
//! relayed from other clients.
//!
//! ## Usage
//!
//! ```bash
//! relaycast-client 127.0.0.1:8070
//! ```

use async_trait::async_trait;
use clap::Parser;
use relaycast_client::{ClientConfig, ClientError, ClientHandler, RelayClient};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Relaycast interactive client
#[derive(Parser, Debug)]
#[command(name = "relaycast-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address as HOST:PORT
    #[arg(default_value = "127.0.0.1:8070")]
    address: String,

    /// Idle seconds before a heartbeat is sent
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    heartbeat_secs: u64,
}

/// Prints relayed lines to stdout
struct PrintHandler;

#[async_trait]
impl ClientHandler for PrintHandler {
    async fn on_message(&self, server: SocketAddr, line: &str) {
        println!("{} : {}", server, line);
    }

    async fn on_disconnect(&self, server: SocketAddr) {
        debug!("Server {} stopped sending", server);
    }
}

fn parse_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let Some((host, port)) = parse_address(&args.address) else {
        eprintln!("Invalid address {}, expected HOST:PORT", args.address);
        return ExitCode::from(2);
    };
    let config = ClientConfig::new(host, port)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_secs));

    let session = match RelayClient::new(config).connect(Arc::new(PrintHandler)).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Connect failed! ({})", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Connect success!");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            error = session.heartbeat_failed() => {
                debug!(error = %error, "Heartbeat failed");
                println!("Has been disconnected from the server!");
                return ExitCode::FAILURE;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => match session.send(&line).await {
                    Ok(()) => {}
                    Err(ClientError::MessageTooLong { .. }) => println!("Message too long!"),
                    Err(e) if e.is_disconnect() => {
                        debug!(error = %e, "Send failed");
                        println!("Has been disconnected from the server!");
                        return ExitCode::FAILURE;
                    }
                    Err(e) => eprintln!("Send failed: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    eprintln!("Reading stdin failed: {}", e);
                    break;
                }
            },
        }
    }

    if let Err(e) = session.close().await {
        debug!(error = %e, "Close failed");
    }
    ExitCode::SUCCESS
}
