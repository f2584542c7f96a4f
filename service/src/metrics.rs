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

//! Lock-free metrics for the relay server
//!
//! Counters are kept as atomics for snapshots and mirrored to the global
//! `metrics` recorder under the `relaycast.` prefix.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
#[derive(Debug)]
pub struct RelayMetrics {
    // Connection counts
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    heartbeat_timeouts: AtomicU64,

    // Traffic
    frames_received: AtomicU64,
    heartbeats_received: AtomicU64,
    messages_relayed: AtomicU64,
    deliveries: AtomicU64,

    // Errors
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    accept_errors: AtomicU64,

    started_at: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            heartbeat_timeouts: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a connection being accepted and registered
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        counter!("relaycast.connections.total").increment(1);
        gauge!("relaycast.connections.active").increment(1.0);
    }

    /// Record a connection leaving the registry
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        gauge!("relaycast.connections.active").decrement(1.0);
    }

    /// Record a connection closed for missing its heartbeat
    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("relaycast.heartbeat.timeouts").increment(1);
    }

    /// Record a frame read from a client
    pub fn frame_received(&self, carried_payload: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if !carried_payload {
            self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
        }
        counter!("relaycast.frames.received").increment(1);
    }

    /// Record a message fanned out to `delivered` recipients
    pub fn message_relayed(&self, delivered: usize) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        counter!("relaycast.messages.relayed").increment(1);
    }

    /// Record a failed read
    pub fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
        counter!("relaycast.errors.read").increment(1);
    }

    /// Record failed broadcast writes
    pub fn write_errors(&self, count: usize) {
        self.write_errors.fetch_add(count as u64, Ordering::Relaxed);
        counter!("relaycast.errors.write").increment(count as u64);
    }

    /// Record a failed accept
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        counter!("relaycast.errors.accept").increment(1);
    }

    /// Get the current number of registered connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the total number of connections since server start
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get a point-in-time view of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// A snapshot of relay metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total connections since server start
    pub total_connections: u64,
    /// Currently registered connections
    pub active_connections: u64,
    /// Connections closed by the heartbeat monitor
    pub heartbeat_timeouts: u64,
    /// Frames read, heartbeats included
    pub frames_received: u64,
    /// Frames that carried no payload
    pub heartbeats_received: u64,
    /// Messages handed to the registry for fan-out
    pub messages_relayed: u64,
    /// Successful per-recipient writes
    pub deliveries: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Failed or timed-out broadcast writes
    pub write_errors: u64,
    /// Failed accepts
    pub accept_errors: u64,
    /// Server uptime
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.read_errors + self.write_errors + self.accept_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_connection_tracking() {
        let metrics = RelayMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections(), 2);
        assert_eq!(metrics.total_connections(), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);
        assert_eq!(metrics.total_connections(), 2);
    }

    #[test]
    fn test_traffic_tracking() {
        let metrics = RelayMetrics::new();

        metrics.frame_received(false);
        metrics.frame_received(true);
        metrics.message_relayed(3);
        metrics.write_errors(1);
        metrics.read_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.heartbeats_received, 1);
        assert_eq!(snapshot.messages_relayed, 1);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.total_errors(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = std::sync::Arc::new(RelayMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics.connection_opened();
                    metrics.frame_received(true);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.total_connections(), 1000);
        assert_eq!(metrics.snapshot().frames_received, 1000);
    }
}
