// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Readiness multiplexer over a set of registered sockets.
//!
//! Registrations carry a per-token interest mask; the [`run`] loop
//! waits for the first enabled source to become ready and dispatches a
//! single event to the sink. Mutations from any thread (including from
//! inside a dispatch) wake the loop and take effect on the next
//! iteration, so a callback may remove its own registration safely.
//!
//! [`run`]: Poller::run

use std::collections::HashMap;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::ops::BitOr;
use std::sync::Arc;

use futures_util::future::select_all;
use parking_lot::Mutex;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Identifies one registration within a poller.
pub type Token = usize;

/// Interest mask for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Want(u8);

impl Want {
    pub const NONE: Want = Want(0);
    pub const READABLE: Want = Want(1);
    pub const WRITABLE: Want = Want(2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Want) -> bool {
        self.0 & other.0 == other.0
    }

    fn remove(&mut self, other: Want) {
        self.0 &= !other.0;
    }

    fn interest(self) -> Option<Interest> {
        match (self.contains(Want::READABLE), self.contains(Want::WRITABLE)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Want {
    type Output = Want;

    fn bitor(self, rhs: Want) -> Want {
        Want(self.0 | rhs.0)
    }
}

/// A socket a poller can watch.
#[derive(Clone)]
pub enum Source {
    Udp(Arc<UdpSocket>),
    Tcp(Arc<TcpStream>),
    Listener(Arc<TcpListener>),
}

impl Source {
    /// Wait until this source satisfies `want`.
    ///
    /// Listeners surface accepted connections directly; an empty mask
    /// never resolves.
    async fn wait_ready(&self, want: Want) -> io::Result<IoEvent> {
        match self {
            Source::Udp(socket) => match want.interest() {
                Some(interest) => socket.ready(interest).await.map(IoEvent::Ready),
                None => std::future::pending().await,
            },
            Source::Tcp(stream) => match want.interest() {
                Some(interest) => stream.ready(interest).await.map(IoEvent::Ready),
                None => std::future::pending().await,
            },
            Source::Listener(listener) => {
                let (stream, addr) = poll_fn(|cx| listener.poll_accept(cx)).await?;
                Ok(IoEvent::Incoming(stream, addr))
            }
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Udp(_) => write!(f, "Source::Udp"),
            Source::Tcp(_) => write!(f, "Source::Tcp"),
            Source::Listener(_) => write!(f, "Source::Listener"),
        }
    }
}

/// What a registration observed.
#[derive(Debug)]
pub enum IoEvent {
    /// Readiness flags for a datagram or stream socket. Closed flags
    /// arrive here too; pending data is dispatched readable-first so
    /// it drains before teardown.
    Ready(Ready),
    /// A connection accepted by a listener registration.
    Incoming(TcpStream, SocketAddr),
    /// The source failed at the readiness level.
    Error(io::Error),
}

/// Receives dispatched events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, token: Token, event: IoEvent);
}

struct Entry {
    source: Source,
    want: Want,
}

/// The registration table plus its wait loop.
pub struct Poller {
    entries: Mutex<HashMap<Token, Entry>>,
    changed: Notify,
    stop: CancellationToken,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Register a source with an empty interest mask.
    pub fn add(&self, token: Token, source: Source) {
        self.entries.lock().insert(token, Entry { source, want: Want::NONE });
        self.changed.notify_one();
    }

    /// Drop a registration. Takes effect after the in-flight dispatch.
    pub fn remove(&self, token: Token) {
        self.entries.lock().remove(&token);
        self.changed.notify_one();
    }

    /// Add `want` to a registration's interest mask.
    pub fn enable(&self, token: Token, want: Want) {
        if let Some(entry) = self.entries.lock().get_mut(&token) {
            entry.want = entry.want | want;
        }
        self.changed.notify_one();
    }

    /// Remove `want` from a registration's interest mask.
    pub fn disable(&self, token: Token, want: Want) {
        if let Some(entry) = self.entries.lock().get_mut(&token) {
            entry.want.remove(want);
        }
        self.changed.notify_one();
    }

    /// Stop the run loop.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Block waiting for readiness, dispatching one event per wakeup,
    /// until [`stop`](Poller::stop).
    pub async fn run(&self, sink: &dyn EventSink) {
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            let watch: Vec<(Token, Source, Want)> = self
                .entries
                .lock()
                .iter()
                .filter(|(_, e)| !e.want.is_empty())
                .map(|(t, e)| (*t, e.source.clone(), e.want))
                .collect();

            if watch.is_empty() {
                tokio::select! {
                    _ = self.changed.notified() => continue,
                    _ = self.stop.cancelled() => break,
                }
            }

            let futures: Vec<_> = watch
                .iter()
                .map(|(token, source, want)| {
                    let token = *token;
                    let want = *want;
                    Box::pin(async move { (token, source.wait_ready(want).await) })
                })
                .collect();

            tokio::select! {
                _ = self.changed.notified() => continue,
                _ = self.stop.cancelled() => break,
                ((token, result), _, _) = select_all(futures) => {
                    let event = match result {
                        Ok(event) => event,
                        Err(e) => IoEvent::Error(e),
                    };
                    sink.on_event(token, event);
                }
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").field("entries", &self.entries.lock().len()).finish()
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
