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

//! Benchmarks for frame handling, the buffer pool and broadcast fan-out

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use relaycast_service::{
    BufferPool, Connection, ConnectionId, ConnectionRegistry, DEFAULT_FRAME_SIZE, Frame,
    PoolConfig, format_broadcast,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");
    let peer = "127.0.0.1:50000".parse().unwrap();

    group.bench_function("decode_heartbeat", |b| {
        b.iter(|| black_box(Frame::decode(black_box(b"*"))))
    });

    let message = Frame::encode_message(&"A".repeat(200), DEFAULT_FRAME_SIZE).unwrap();
    group.throughput(Throughput::Bytes(message.len() as u64));
    group.bench_function("decode_message_200b", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&message))))
    });

    group.bench_function("format_broadcast_200b", |b| {
        b.iter(|| black_box(format_broadcast(peer, black_box(&message[1..]))))
    });

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("buffer_pool");

    let pool = rt.block_on(async { BufferPool::new(PoolConfig::default()) });

    group.bench_function("acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            let buffer = pool.acquire().await.unwrap();
            pool.release(black_box(buffer)).await.unwrap();
        })
    });

    group.throughput(Throughput::Elements(16));
    group.bench_function("acquire_16_release_16", |b| {
        b.to_async(&rt).iter(|| async {
            let mut held = Vec::with_capacity(16);
            for _ in 0..16 {
                held.push(pool.acquire().await.unwrap());
            }
            for buffer in held {
                pool.release(buffer).await.unwrap();
            }
        })
    });

    group.finish();
    rt.block_on(pool.shutdown());
}

async fn connected_pair(id: u64) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (server, _) = listener.accept().await.unwrap();
    let conn = Connection::wrap(server, ConnectionId::new(id)).unwrap();
    (Arc::new(conn), client.await.unwrap())
}

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("broadcast");

    for members in [2u64, 8, 32] {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(1)));
        let peers = rt.block_on(async {
            let mut peers = Vec::new();
            for id in 1..=members {
                let (conn, client) = connected_pair(id).await;
                registry.register(conn).await;
                peers.push(client);
            }
            peers
        });

        // Keep the receive side drained so sends never block.
        let drains: Vec<_> = peers
            .into_iter()
            .map(|mut peer| {
                rt.spawn(async move {
                    let mut buf = [0u8; 4096];
                    while matches!(peer.read(&mut buf).await, Ok(n) if n > 0) {}
                })
            })
            .collect();

        group.throughput(Throughput::Elements(members - 1));
        group.bench_function(format!("fan_out_{}_members", members), |b| {
            b.to_async(&rt).iter(|| async {
                let result = registry
                    .broadcast(ConnectionId::new(1), black_box(b"127.0.0.1:50000 : hello"))
                    .await;
                black_box(result)
            })
        });

        rt.block_on(registry.shutdown());
        for drain in drains {
            drain.abort();
        }
    }

    group.finish();
}

criterion_group!(benches, bench_frames, bench_pool, bench_broadcast);
criterion_main!(benches);
