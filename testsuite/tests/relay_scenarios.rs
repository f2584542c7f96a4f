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

//! End-to-end scenarios: real server, real clients, loopback sockets

use relaycast_client::ClientError;
use relaycast_testsuite::{
    client_config, connect, loopback_config, start_server, wait_for_connections,
};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_ping_reaches_peer_only() {
    let server = start_server(loopback_config()).await;

    let (a, a_lines) = connect(client_config(&server)).await;
    let (_b, b_lines) = connect(client_config(&server)).await;
    wait_for_connections(&server, 2).await;

    a.send("ping").await.unwrap();

    let line = b_lines.next_line(WAIT).await.expect("b received nothing");
    assert!(line.contains("ping"));
    assert_eq!(line, format!("{} : ping", a.local_addr()));
    assert!(a_lines.is_quiet(QUIET).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fan_out_reaches_all_but_sender() {
    let server = start_server(loopback_config()).await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(connect(client_config(&server)).await);
    }
    wait_for_connections(&server, 5).await;

    let (sender, sender_lines) = &clients[0];
    sender.send("to everyone").await.unwrap();

    for (_, lines) in clients.iter().skip(1) {
        let line = lines.next_line(WAIT).await.expect("recipient missed message");
        assert!(line.ends_with(" : to everyone"));
    }
    assert!(sender_lines.is_quiet(QUIET).await);

    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.messages_relayed, 1);
    assert_eq!(snapshot.deliveries, 4);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_silent_client_is_closed_and_excluded() {
    let interval = Duration::from_millis(100);
    let server = start_server(loopback_config().with_heartbeat_interval(interval)).await;

    // Heartbeats well inside the server's window.
    let heartbeat = interval / 2;
    let (a, _a_lines) = connect(client_config(&server).with_heartbeat_interval(heartbeat)).await;
    let (_b, b_lines) = connect(client_config(&server).with_heartbeat_interval(heartbeat)).await;

    // A raw socket that never writes anything.
    let mut silent = TcpStream::connect(server.local_addr()).await.unwrap();
    wait_for_connections(&server, 3).await;

    let mut buf = [0u8; 64];
    let n = timeout(interval * 3 + WAIT, silent.read(&mut buf))
        .await
        .expect("silent client was never closed")
        .unwrap();
    assert_eq!(n, 0);
    wait_for_connections(&server, 2).await;

    a.send("after").await.unwrap();
    assert!(b_lines.next_line(WAIT).await.unwrap().contains("after"));
    assert_eq!(server.metrics().snapshot().heartbeat_timeouts, 1);
    assert_eq!(server.metrics().snapshot().write_errors, 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_client_heartbeats_keep_it_registered() {
    let interval = Duration::from_millis(100);
    let server = start_server(loopback_config().with_heartbeat_interval(interval)).await;

    let (session, _lines) =
        connect(client_config(&server).with_heartbeat_interval(interval / 2)).await;
    wait_for_connections(&server, 1).await;

    // Several timeout windows without any user traffic.
    sleep(interval * 10).await;

    assert_eq!(server.connection_count().await, 1);
    assert!(!session.is_closed());
    assert!(server.metrics().snapshot().heartbeats_received > 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_long_message_is_rejected_locally() {
    let server = start_server(loopback_config()).await;

    let (a, _a_lines) = connect(client_config(&server)).await;
    let (_b, b_lines) = connect(client_config(&server)).await;
    wait_for_connections(&server, 2).await;

    let err = a.send(&"x".repeat(256)).await.unwrap_err();
    assert!(matches!(err, ClientError::MessageTooLong { len: 256, max: 255 }));
    assert!(b_lines.is_quiet(QUIET).await);

    // The longest accepted message fits one server read.
    let longest = "y".repeat(255);
    a.send(&longest).await.unwrap();
    let line = b_lines.next_line(WAIT).await.unwrap();
    assert!(line.ends_with(&longest));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_shutdown_fails_client_heartbeat() {
    let server = start_server(loopback_config()).await;

    let (session, lines) =
        connect(client_config(&server).with_heartbeat_interval(Duration::from_millis(50))).await;
    wait_for_connections(&server, 1).await;

    server.shutdown().await.unwrap();

    let err = timeout(Duration::from_secs(3), session.heartbeat_failed())
        .await
        .expect("client never noticed the server was gone");
    assert!(matches!(err, ClientError::Heartbeat(_)));

    timeout(WAIT, async {
        while !lines.is_disconnected() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler was never told about the disconnect");
}
