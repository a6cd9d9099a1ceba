// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response correlation: a caller registers a watcher for an
//! expected `(type, seq)` pair, sends its request, and blocks on the
//! watcher until the reply is posted or the deadline passes.
//!
//! Sequence 0 is a legal key and there is no wildcard matching; a
//! producer that posts with no matching watcher gets `NotFound` and is
//! expected to drop the payload silently (late replies are discarded).

use bytes::Bytes;
use huddle_core::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

const SLOT_SHIFT: u32 = 6;
const SLOT_CAPACITY: usize = 1 << SLOT_SHIFT;

/// Golden-ratio multiplicative hash over the mixed key, so many
/// watchers on distinct seqs of one type spread across buckets.
fn bucket(msg_type: u8, seq: u32) -> usize {
    let key = (u32::from(msg_type) << 16) | seq;
    (key.wrapping_mul(0x9e37_79b9) >> (32 - SLOT_SHIFT)) as usize
}

struct Slot {
    id: u64,
    msg_type: u8,
    seq: u32,
    cap: usize,
    tx: oneshot::Sender<Bytes>,
}

/// The correlation table: fixed-width buckets of pending watchers.
pub struct IoWait {
    slots: Mutex<Table>,
}

struct Table {
    buckets: Vec<Vec<Slot>>,
    next_id: u64,
}

/// A registered expectation. Consumed by [`IoWait::wait`].
#[derive(Debug)]
pub struct Watcher {
    id: u64,
    msg_type: u8,
    seq: u32,
    rx: oneshot::Receiver<Bytes>,
}

impl IoWait {
    pub fn new() -> Self {
        let buckets = (0..SLOT_CAPACITY).map(|_| Vec::new()).collect();
        Self { slots: Mutex::new(Table { buckets, next_id: 1 }) }
    }

    /// Register interest in a `(type, seq)` reply before sending the
    /// request, so the reply cannot race the registration.
    ///
    /// `cap` bounds how many payload bytes the waiter will accept; a
    /// longer posted payload is truncated to it.
    pub fn register(&self, msg_type: u8, seq: u32, cap: usize) -> Watcher {
        let (tx, rx) = oneshot::channel();
        let mut table = self.slots.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.buckets[bucket(msg_type, seq)].push(Slot { id, msg_type, seq, cap, tx });
        Watcher { id, msg_type, seq, rx }
    }

    /// Block until the watcher's reply is posted or `timeout` passes.
    /// The slot is gone in either case.
    pub async fn wait(&self, watcher: Watcher, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, watcher.rx).await {
            Ok(Ok(data)) => Ok(data),
            // Sender dropped without a post: the table went away.
            Ok(Err(_)) => Err(Error::Timeout),
            Err(_) => {
                self.unregister(watcher.msg_type, watcher.seq, watcher.id);
                Err(Error::Timeout)
            }
        }
    }

    /// Complete the first watcher matching `(type, seq)`.
    ///
    /// The payload is truncated to the watcher's advertised capacity.
    /// `NotFound` means no one is waiting; the caller drops the data.
    pub fn post(&self, msg_type: u8, seq: u32, mut data: Bytes) -> Result<()> {
        let slot = {
            let mut table = self.slots.lock();
            let bucket = &mut table.buckets[bucket(msg_type, seq)];
            let idx = bucket
                .iter()
                .position(|s| s.msg_type == msg_type && s.seq == seq)
                .ok_or(Error::NotFound("no watcher for response"))?;
            bucket.swap_remove(idx)
        };
        if data.len() > slot.cap {
            data.truncate(slot.cap);
        }
        // A racing timeout may have dropped the receiver already.
        let _ = slot.tx.send(data);
        Ok(())
    }

    fn unregister(&self, msg_type: u8, seq: u32, id: u64) {
        let mut table = self.slots.lock();
        let bucket = &mut table.buckets[bucket(msg_type, seq)];
        if let Some(idx) = bucket.iter().position(|s| s.id == id) {
            bucket.swap_remove(idx);
        }
    }

    /// Watchers currently registered (tests).
    pub fn pending(&self) -> usize {
        self.slots.lock().buckets.iter().map(Vec::len).sum()
    }
}

impl Default for IoWait {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoWait").field("pending", &self.pending()).finish()
    }
}

#[cfg(test)]
#[path = "iowait_tests.rs"]
mod tests;
