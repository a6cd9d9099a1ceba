// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Datagram fragmentation and reassembly.
//!
//! [`Splitter`] turns a payload into bounded fragments tagged with a
//! per-sender 16-bit set id, offset, and more-fragments bit.
//! [`Assembler`] rebuilds them per id, delivering each completed
//! payload exactly once; queues that never complete are freed when
//! their deadline passes, and set ids may be reused afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use huddle_core::limits::{CLI_DATA_MAX_LEN, DATA_MAX_LEN};
use huddle_core::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::timer::{TimerHandle, TimerService};

/// One fragment in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragVec {
    /// Fragment-set id shared by every piece of one payload.
    pub seq: u16,
    pub ofs: u32,
    /// More fragments follow; the terminal fragment clears this and
    /// fixes the total at `ofs + data.len()`.
    pub mf: bool,
    pub data: Bytes,
}

/// Splits payloads into fragments of at most `frag_len` bytes.
#[derive(Debug)]
pub struct Splitter {
    frag_len: usize,
    next_seq: Mutex<u16>,
}

impl Splitter {
    pub fn new(frag_len: usize) -> Self {
        Self { frag_len, next_seq: Mutex::new(0) }
    }

    fn alloc_seq(&self) -> u16 {
        let mut seq = self.next_seq.lock();
        let out = *seq;
        *seq = seq.wrapping_add(1);
        out
    }

    /// Emit fragments in ascending offset order. Zero-copy: each
    /// fragment borrows a slice of the input.
    pub fn split(&self, data: Bytes) -> Result<Vec<FragVec>> {
        if data.len() > CLI_DATA_MAX_LEN {
            return Err(Error::InvalidInput("payload beyond split limit"));
        }
        let seq = self.alloc_seq();
        if data.is_empty() {
            return Ok(vec![FragVec { seq, ofs: 0, mf: false, data }]);
        }
        let mut out = Vec::with_capacity(data.len().div_ceil(self.frag_len));
        let mut ofs = 0usize;
        while ofs < data.len() {
            let len = (data.len() - ofs).min(self.frag_len);
            out.push(FragVec {
                seq,
                ofs: ofs as u32,
                mf: ofs + len < data.len(),
                data: data.slice(ofs..ofs + len),
            });
            ofs += len;
        }
        Ok(out)
    }
}

struct FragQueue {
    frags: BTreeMap<u32, Bytes>,
    received: usize,
    total: Option<usize>,
    timer: TimerHandle,
}

struct AsmInner {
    queues: Mutex<HashMap<u16, FragQueue>>,
    timers: TimerService,
    deadline: Duration,
    timeouts: AtomicUsize,
    input: Box<dyn Fn(Bytes) + Send + Sync>,
}

/// Rebuilds fragment sets and hands completed payloads to the input
/// callback.
#[derive(Clone)]
pub struct Assembler {
    inner: Arc<AsmInner>,
}

impl Assembler {
    pub fn new(
        timers: TimerService,
        deadline: Duration,
        input: impl Fn(Bytes) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(AsmInner {
                queues: Mutex::new(HashMap::new()),
                timers,
                deadline,
                timeouts: AtomicUsize::new(0),
                input: Box::new(input),
            }),
        }
    }

    /// Insert one received fragment.
    ///
    /// A duplicate offset is `AlreadyExists` and the fragment is
    /// dropped while reassembly continues. Completion delivers the
    /// payload to the input callback with no lock held.
    pub fn insert(&self, frag: FragVec) -> Result<()> {
        let claimed_end = frag.ofs as usize + frag.data.len();
        if claimed_end > DATA_MAX_LEN {
            return Err(Error::InvalidInput("fragment beyond payload cap"));
        }

        let completed = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(frag.seq).or_insert_with(|| {
                let timer = self.arm_expiry(frag.seq);
                FragQueue { frags: BTreeMap::new(), received: 0, total: None, timer }
            });

            if queue.frags.contains_key(&frag.ofs) {
                return Err(Error::AlreadyExists);
            }
            queue.received += frag.data.len();
            if !frag.mf {
                queue.total = Some(claimed_end);
            }
            queue.frags.insert(frag.ofs, frag.data);

            if queue.total != Some(queue.received) {
                None
            } else if !contiguous(&queue.frags) {
                // Overlapping or misaligned pieces; nothing sane can
                // come out of this set.
                let queue = queues.remove(&frag.seq);
                if let Some(q) = queue {
                    self.inner.timers.remove(q.timer);
                }
                return Err(Error::InvalidInput("fragment set not contiguous"));
            } else {
                let queue = queues.remove(&frag.seq);
                queue.map(|q| {
                    self.inner.timers.remove(q.timer);
                    reassemble(q)
                })
            }
        };

        if let Some(payload) = completed {
            (self.inner.input)(payload);
        }
        Ok(())
    }

    /// Queues discarded on deadline so far.
    pub fn timeouts(&self) -> usize {
        self.inner.timeouts.load(Ordering::Relaxed)
    }

    /// Fragment sets still incomplete (tests).
    pub fn pending(&self) -> usize {
        self.inner.queues.lock().len()
    }

    fn arm_expiry(&self, seq: u16) -> TimerHandle {
        let weak = Arc::downgrade(&self.inner);
        self.inner.timers.add_after(self.inner.deadline, move || expire(&weak, seq))
    }
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("pending", &self.pending())
            .field("timeouts", &self.timeouts())
            .finish()
    }
}

fn expire(inner: &Weak<AsmInner>, seq: u16) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.queues.lock().remove(&seq).is_some() {
        inner.timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(seq, "fragment reassembly timed out");
    }
}

fn contiguous(frags: &BTreeMap<u32, Bytes>) -> bool {
    let mut next = 0u32;
    for (ofs, data) in frags {
        if *ofs != next {
            return false;
        }
        next = ofs + data.len() as u32;
    }
    true
}

fn reassemble(queue: FragQueue) -> Bytes {
    let total = queue.total.unwrap_or(0);
    let mut out = Vec::with_capacity(total);
    for data in queue.frags.values() {
        out.extend_from_slice(data);
    }
    Bytes::from(out)
}

#[cfg(test)]
#[path = "frag_tests.rs"]
mod tests;
