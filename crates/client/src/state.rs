// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session snapshot for a process handoff.
//!
//! Serializes just enough to resume relaying after an exec: who we
//! are, which group we are in, and where its relay lives. This is a
//! convenience for the demo tooling, not a durability mechanism; the
//! coordinator will drop the user anyway if heartbeats stop.

use std::net::SocketAddr;
use std::path::Path;

use huddle_core::{Error, GroupId, Result, TaskId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub task_id: Option<TaskId>,
    pub relay_addr: Option<SocketAddr>,
}

impl SessionState {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|_| Error::InvalidInput("unserializable session state"))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|_| Error::InvalidInput("bad session state file"))
    }
}
