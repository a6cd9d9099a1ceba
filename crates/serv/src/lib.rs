// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! huddle-serv: the Huddle server processes.
//!
//! Two roles share this crate, mirroring the platform split: the
//! coordinator (owns users and groups, schedules relay tasks onto
//! nodes) and the node server (hosts the relay tasks on a pool of task
//! workers). The `serv` binary runs either role, or both in one
//! process.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod coord;
pub mod env;
pub mod node;
pub mod task;

pub use coord::{CenterServer, ClientMgr, NodeMgr};
pub use env::ServConfig;
pub use node::NodeServer;
pub use task::{Task, TaskProtocol, TaskRegistry};
