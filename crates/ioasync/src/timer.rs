// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered deadline set with callback dispatch.
//!
//! One spawned task sleeps until the earliest deadline and fires due
//! entries in nondecreasing order; entries sharing a deadline fire in
//! insertion order. Firing detaches the entry first, so a callback may
//! re-arm itself through the service handle it captured. Callbacks run
//! with no lock held.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type TimerFn = Box<dyn FnOnce() + Send>;

/// Names one scheduled entry for `remove`/`modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entries {
    // Keyed (deadline, insertion id): BTreeMap order is fire order.
    queue: BTreeMap<(Instant, u64), TimerFn>,
    by_id: HashMap<u64, Instant>,
    next_id: u64,
}

/// The deadline set plus its dispatch task.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    entries: Mutex<Entries>,
    changed: Notify,
    stop: CancellationToken,
}

impl TimerService {
    /// Create the service and spawn its dispatch task.
    pub fn start() -> Self {
        let inner = Arc::new(TimerInner {
            entries: Mutex::new(Entries {
                queue: BTreeMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            }),
            changed: Notify::new(),
            stop: CancellationToken::new(),
        });
        let run = Arc::clone(&inner);
        tokio::spawn(async move { run.dispatch().await });
        Self { inner }
    }

    /// Schedule `f` at an absolute deadline.
    pub fn add(&self, deadline: Instant, f: impl FnOnce() + Send + 'static) -> TimerHandle {
        let mut entries = self.inner.entries.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.queue.insert((deadline, id), Box::new(f));
        entries.by_id.insert(id, deadline);
        drop(entries);
        self.inner.changed.notify_one();
        TimerHandle(id)
    }

    /// Schedule `f` after a delay.
    pub fn add_after(&self, after: Duration, f: impl FnOnce() + Send + 'static) -> TimerHandle {
        self.add(Instant::now() + after, f)
    }

    /// Cancel a pending entry. False if it already fired or was removed.
    pub fn remove(&self, handle: TimerHandle) -> bool {
        let mut entries = self.inner.entries.lock();
        let Some(deadline) = entries.by_id.remove(&handle.0) else {
            return false;
        };
        entries.queue.remove(&(deadline, handle.0));
        drop(entries);
        self.inner.changed.notify_one();
        true
    }

    /// Move a pending entry to a new deadline, keeping its callback.
    /// False if it already fired or was removed.
    pub fn modify(&self, handle: TimerHandle, deadline: Instant) -> bool {
        let mut entries = self.inner.entries.lock();
        let Some(old) = entries.by_id.get(&handle.0).copied() else {
            return false;
        };
        let Some(f) = entries.queue.remove(&(old, handle.0)) else {
            return false;
        };
        entries.queue.insert((deadline, handle.0), f);
        entries.by_id.insert(handle.0, deadline);
        drop(entries);
        self.inner.changed.notify_one();
        true
    }

    /// Entries still pending (tests).
    pub fn pending(&self) -> usize {
        self.inner.entries.lock().queue.len()
    }

    /// Stop the dispatch task; pending entries never fire.
    pub fn shutdown(&self) {
        self.inner.stop.cancel();
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService").field("pending", &self.pending()).finish()
    }
}

impl TimerInner {
    async fn dispatch(&self) {
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            self.fire_due();
            let next = self.entries.lock().queue.keys().next().map(|(t, _)| *t);
            match next {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.changed.notified() => {}
                        _ = self.stop.cancelled() => break,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.changed.notified() => {}
                        _ = self.stop.cancelled() => break,
                    }
                }
            }
        }
    }

    /// Detach and run every entry whose deadline has passed.
    fn fire_due(&self) {
        loop {
            let due = {
                let mut entries = self.entries.lock();
                let now = Instant::now();
                match entries.queue.keys().next().copied() {
                    Some((deadline, id)) if deadline <= now => {
                        let f = entries.queue.remove(&(deadline, id));
                        entries.by_id.remove(&id);
                        f
                    }
                    _ => None,
                }
            };
            match due {
                Some(f) => f(),
                None => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
