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

//! Read buffer recycler
//!
//! The pool hands out fixed-capacity read buffers and takes them back when a
//! connection's read loop ends. A single recycler task owns the free set.
//! Acquirers queue one at a time on a one-slot request channel and the
//! recycler answers each request straight from the free set; released buffers
//! come back through a rendezvous channel. When the free set is empty the
//! recycler allocates a fresh buffer on the spot, so the pool starts empty and
//! grows only with demand.
//!
//! No free buffer ever waits outside the free set, so the sweep sees every
//! idle buffer and an evicted buffer can never be handed out again.
//!
//! The same task runs the eviction sweep once per expiry window and drops
//! every free buffer that has been idle for longer than that window, so
//! steady-state memory follows recent use rather than the historical peak.
//!
//! ```text
//!   acquire() ──> request (1 slot) ──>┐
//!             <── reply ──────────────│  recycler task
//!   release() ──> rendezvous ────────>│  free set: [(buffer, released_at)]
//!                                     │  sweep every `expiry`
//! ```

use crate::{PoolConfig, RelayError, Result};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A fixed-capacity read buffer owned by the pool
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Capacity of the buffer in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A free buffer and when it was last released.
///
/// `released_at` is `None` for a buffer that was allocated but never handed
/// out; such a buffer has no age and is never evicted.
struct IdleBuffer {
    buffer: Buffer,
    released_at: Option<Instant>,
}

/// Free buffers, most recently released first
#[derive(Default)]
struct FreeSet {
    entries: VecDeque<IdleBuffer>,
}

impl FreeSet {
    fn push_released(&mut self, buffer: Buffer, now: Instant) {
        self.entries.push_front(IdleBuffer {
            buffer,
            released_at: Some(now),
        });
    }

    fn pop(&mut self) -> Option<IdleBuffer> {
        self.entries.pop_front()
    }

    /// Put back a buffer whose acquirer went away, keeping its age
    fn restore(&mut self, idle: IdleBuffer) {
        self.entries.push_front(idle);
    }

    /// Drop every buffer idle for longer than `expiry`, returning the count
    fn evict_expired(&mut self, now: Instant, expiry: std::time::Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|idle| match idle.released_at {
            Some(at) => now.duration_since(at) <= expiry,
            None => true,
        });
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    allocated: AtomicU64,
    evicted: AtomicU64,
    idle: AtomicUsize,
    checked_out: AtomicUsize,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated since the pool was created
    pub allocated: u64,
    /// Buffers dropped by the eviction sweep
    pub evicted: u64,
    /// Buffers sitting in the free set
    pub idle: usize,
    /// Buffers acquired and not yet released
    pub checked_out: usize,
}

/// Recycling pool of fixed-size read buffers
pub struct BufferPool {
    config: PoolConfig,
    requests: mpsc::Sender<oneshot::Sender<Buffer>>,
    returns: mpsc::Sender<Buffer>,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
    recycler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BufferPool {
    /// Create a pool and start its recycler task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (returns_tx, returns_rx) = mpsc::channel(1);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = CancellationToken::new();

        let recycler = Recycler {
            config,
            free: FreeSet::default(),
            requests: requests_rx,
            returns: returns_rx,
            counters: counters.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(recycler.run());

        Self {
            config,
            requests: requests_tx,
            returns: returns_tx,
            counters,
            shutdown,
            recycler: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take a buffer, waiting for the recycler to hand one over.
    ///
    /// Never waits on allocation: the recycler creates a buffer whenever its
    /// free set is empty.
    pub async fn acquire(&self) -> Result<Buffer> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::PoolClosed);
        }
        let (reply, buffer) = oneshot::channel();
        self.requests
            .send(reply)
            .await
            .map_err(|_| RelayError::PoolClosed)?;
        let buffer = buffer.await.map_err(|_| RelayError::PoolClosed)?;
        self.counters.checked_out.fetch_add(1, Ordering::Relaxed);
        trace!("Buffer acquired");
        Ok(buffer)
    }

    /// Return a buffer to the free set, stamped with the current time
    pub async fn release(&self, buffer: Buffer) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::PoolClosed);
        }
        self.returns
            .send(buffer)
            .await
            .map_err(|_| RelayError::PoolClosed)?;
        let _ = self
            .counters
            .checked_out
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        trace!("Buffer released");
        Ok(())
    }

    /// Get a snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            idle: self.counters.idle.load(Ordering::Relaxed),
            checked_out: self.counters.checked_out.load(Ordering::Relaxed),
        }
    }

    /// Stop the recycler and drop every free buffer
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = match self.recycler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Check whether the pool has been shut down
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owner of the free set
struct Recycler {
    config: PoolConfig,
    free: FreeSet,
    requests: mpsc::Receiver<oneshot::Sender<Buffer>>,
    returns: mpsc::Receiver<Buffer>,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
}

impl Recycler {
    async fn run(mut self) {
        let expiry = self.config.expiry;
        let mut sweep = interval_at(Instant::now() + expiry, expiry);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(buffer) = self.returns.recv() => {
                    if buffer.capacity() == self.config.buffer_size {
                        self.free.push_released(buffer, Instant::now());
                    } else {
                        debug!(capacity = buffer.capacity(), "Dropping foreign buffer");
                    }
                }
                request = self.requests.recv() => match request {
                    Some(reply) => self.serve(reply),
                    None => break,
                },
                _ = sweep.tick() => {
                    let evicted = self.free.evict_expired(Instant::now(), expiry);
                    if evicted > 0 {
                        self.counters
                            .evicted
                            .fetch_add(evicted as u64, Ordering::Relaxed);
                        debug!(evicted, remaining = self.free.len(), "Evicted idle buffers");
                    }
                }
            }
            self.counters.idle.store(self.free.len(), Ordering::Relaxed);
        }

        self.counters.idle.store(0, Ordering::Relaxed);
        debug!("Buffer recycler stopped");
    }

    fn serve(&mut self, reply: oneshot::Sender<Buffer>) {
        let idle = match self.free.pop() {
            Some(idle) => idle,
            None => IdleBuffer {
                buffer: self.allocate(),
                released_at: None,
            },
        };
        let released_at = idle.released_at;
        if let Err(buffer) = reply.send(idle.buffer) {
            trace!("Acquirer went away, keeping buffer");
            self.free.restore(IdleBuffer { buffer, released_at });
        }
    }

    fn allocate(&self) -> Buffer {
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        trace!(size = self.config.buffer_size, "Allocating buffer");
        Buffer::new(self.config.buffer_size)
    }
}
