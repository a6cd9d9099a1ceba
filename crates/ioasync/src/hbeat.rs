// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat supervision: a periodic tick decrements per-participant
//! counters; a participant whose counter reaches zero goes offline and
//! the death callback fires exactly once per transition. A beat resets
//! the counter and restores the online flag.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use huddle_core::limits::{HEARTBEAT_INIT, HEARTBEAT_PERIOD};
use parking_lot::Mutex;
use tracing::info;

use crate::timer::{TimerHandle, TimerService};

struct HbEntry {
    count: i32,
    online: bool,
}

struct HbInner {
    entries: Mutex<HashMap<u32, HbEntry>>,
    period: Duration,
    timers: TimerService,
    tick: Mutex<Option<TimerHandle>>,
    dead: Box<dyn Fn(u32) + Send + Sync>,
}

/// The supervisor. Participants are keyed by a caller-chosen 32-bit id.
#[derive(Clone)]
pub struct Heartbeats {
    inner: Arc<HbInner>,
}

impl Heartbeats {
    /// Create a supervisor ticking at [`HEARTBEAT_PERIOD`] and start it.
    pub fn start(timers: TimerService, dead: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self::start_with_period(timers, HEARTBEAT_PERIOD, dead)
    }

    pub fn start_with_period(
        timers: TimerService,
        period: Duration,
        dead: impl Fn(u32) + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(HbInner {
            entries: Mutex::new(HashMap::new()),
            period,
            timers,
            tick: Mutex::new(None),
            dead: Box::new(dead),
        });
        arm(&inner);
        Self { inner }
    }

    /// Track a participant, initially online with a full counter.
    pub fn add(&self, id: u32) {
        self.inner
            .entries
            .lock()
            .insert(id, HbEntry { count: HEARTBEAT_INIT, online: true });
    }

    /// Stop tracking a participant.
    pub fn remove(&self, id: u32) {
        self.inner.entries.lock().remove(&id);
    }

    /// A liveness signal arrived: full counter, back online.
    pub fn beat(&self, id: u32) {
        if let Some(entry) = self.inner.entries.lock().get_mut(&id) {
            entry.count = HEARTBEAT_INIT;
            entry.online = true;
        }
    }

    pub fn is_online(&self, id: u32) -> bool {
        self.inner.entries.lock().get(&id).map(|e| e.online).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop ticking; entries stay as they are.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.tick.lock().take() {
            self.inner.timers.remove(handle);
        }
    }
}

impl std::fmt::Debug for Heartbeats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeats").field("tracked", &self.len()).finish()
    }
}

fn arm(inner: &Arc<HbInner>) {
    let weak = Arc::downgrade(inner);
    let handle = inner.timers.add_after(inner.period, move || tick(&weak));
    *inner.tick.lock() = Some(handle);
}

fn tick(weak: &Weak<HbInner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let newly_dead: Vec<u32> = {
        let mut entries = inner.entries.lock();
        entries
            .iter_mut()
            .filter_map(|(id, entry)| {
                entry.count -= 1;
                if entry.online && entry.count <= 0 {
                    entry.online = false;
                    Some(*id)
                } else {
                    None
                }
            })
            .collect()
    };
    for id in newly_dead {
        info!(id, "participant heartbeat expired");
        (inner.dead)(id);
    }
    arm(&inner);
}

#[cfg(test)]
#[path = "hbeat_tests.rs"]
mod tests;
