// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-size, reference-counted packet buffers drawn from a bounded
//! free list.
//!
//! A buffer is written through an exclusive [`PacketBuf`], then frozen
//! into a shared [`Packet`] whose clones are the reference count.
//! Mutation after freezing is impossible by construction; when the
//! last clone drops, the backing storage returns to its pool.

use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use huddle_core::{Error, Result};
use parking_lot::Mutex;
use tracing::warn;

/// Thread-safe pool of equally sized byte buffers.
///
/// In unlimited mode a free-list miss allocates a fresh block; with a
/// limit set, a miss past the limit fails with `ResourceExhausted`.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buf_size: usize,
    limit: Option<usize>,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    created: usize,
}

impl PacketPool {
    /// Pool that grows on demand past `init_count`.
    pub fn new(buf_size: usize, init_count: usize) -> Self {
        Self::build(buf_size, init_count, None)
    }

    /// Pool capped at `max_count` live buffers.
    pub fn with_limit(buf_size: usize, init_count: usize, max_count: usize) -> Self {
        Self::build(buf_size, init_count, Some(max_count))
    }

    fn build(buf_size: usize, init_count: usize, limit: Option<usize>) -> Self {
        let free = (0..init_count).map(|_| Vec::with_capacity(buf_size)).collect();
        Self {
            inner: Arc::new(PoolInner {
                buf_size,
                limit,
                state: Mutex::new(PoolState { free, created: init_count }),
            }),
        }
    }

    /// Take a buffer with refcount one. O(1).
    pub fn alloc(&self) -> Result<PacketBuf> {
        let mut state = self.inner.state.lock();
        let data = match state.free.pop() {
            Some(data) => data,
            None => {
                if let Some(limit) = self.inner.limit {
                    if state.created >= limit {
                        return Err(Error::Exhausted("packet pool"));
                    }
                }
                state.created += 1;
                if state.created % 512 == 0 {
                    warn!(blocks = state.created, "packet pool hitting new high");
                }
                Vec::with_capacity(self.inner.buf_size)
            }
        };
        drop(state);
        Ok(PacketBuf { data: Some(data), pool: Arc::clone(&self.inner) })
    }

    /// Capacity of each buffer, header prefix included.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Buffers currently on the free list.
    pub fn free_count(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Buffers ever created, free or live.
    pub fn created(&self) -> usize {
        self.inner.state.lock().created
    }
}

impl std::fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PacketPool")
            .field("buf_size", &self.inner.buf_size)
            .field("free", &state.free.len())
            .field("created", &state.created)
            .finish()
    }
}

impl PoolInner {
    fn recycle(&self, mut data: Vec<u8>) {
        data.clear();
        self.state.lock().free.push(data);
    }
}

/// An exclusively owned, writable buffer. The single-writer phase of a
/// packet's life: fill it, then [`freeze`](PacketBuf::freeze) it.
pub struct PacketBuf {
    data: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl PacketBuf {
    /// The writable byte storage. Append via `BufMut` or slice ops.
    pub fn buf_mut(&mut self) -> &mut Vec<u8> {
        self.data.get_or_insert_with(Vec::new)
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the writable phase; the result is shareable and immutable.
    pub fn freeze(mut self) -> Packet {
        let data = self.data.take().unwrap_or_default();
        Packet { inner: Arc::new(Frozen { data, pool: Arc::clone(&self.pool) }) }
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.recycle(data);
        }
    }
}

impl std::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuf").field("len", &self.len()).finish()
    }
}

struct Frozen {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Drop for Frozen {
    fn drop(&mut self) {
        let data = mem::take(&mut self.data);
        self.pool.recycle(data);
    }
}

/// A frozen packet. Clones share the same storage; the clone count is
/// the packet's reference count, and the storage returns to its pool
/// when the last clone drops.
#[derive(Clone)]
pub struct Packet {
    inner: Arc<Frozen>,
}

impl Packet {
    /// Live references to this packet's storage.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.inner.data.len())
            .field("refcount", &self.refcount())
            .finish()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
