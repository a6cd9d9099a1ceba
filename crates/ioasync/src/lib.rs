// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! huddle-ioasync: the asynchronous I/O runtime underneath the Huddle
//! platform.
//!
//! The pieces compose bottom-up: a refcounted packet [`pool`], a
//! readiness [`poller`], the socket [`reactor`] built on both, the
//! [`iowait`] request/response correlator, the datagram [`frag`]menter,
//! the [`hbeat`] supervisor, and the [`timer`] service they all
//! schedule against. Everything is an explicit service owned by the
//! caller; nothing here is a process-wide global.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod frag;
pub mod hbeat;
pub mod iowait;
pub mod pool;
pub mod reactor;
pub mod timer;

mod poller;

pub use frag::{Assembler, FragVec, Splitter};
pub use hbeat::Heartbeats;
pub use iowait::{IoWait, Watcher};
pub use pool::{Packet, PacketBuf, PacketPool};
pub use poller::{EventSink, IoEvent, Poller, Source, Token, Want};
pub use reactor::{IoAsync, IoHandler};
pub use timer::{TimerHandle, TimerService};
