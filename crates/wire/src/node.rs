// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator↔node control messages.
//!
//! A task-assign payload is the generic head followed by a kind-specific
//! body; the task protocol registry owns the body on both ends. Only
//! the turn bodies exist today.

use bytes::{Buf, BufMut};
use huddle_core::{Error, GroupId, Result, TaskId, UserId};
use std::net::SocketAddr;

use crate::addr::{decode_addr, encode_addr};

/// Message types the node server sends to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeMsg {
    TaskAssignResponse = 0,
}

impl NodeMsg {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::TaskAssignResponse),
            _ => None,
        }
    }
}

/// Message types the coordinator sends to a node server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CenterMsg {
    TaskAssign = 0,
    TaskReclaim = 1,
    TaskControl = 2,
}

impl CenterMsg {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::TaskAssign,
            1 => Self::TaskReclaim,
            2 => Self::TaskControl,
            _ => return None,
        })
    }
}

/// Roster control operations carried by task-control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlOp {
    Join = 1,
    Leave = 2,
}

impl ControlOp {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Join),
            2 => Some(Self::Leave),
            _ => None,
        }
    }
}

fn need(src: &impl Buf, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(Error::InvalidInput("short payload"));
    }
    Ok(())
}

/// Generic head of a task-assign payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAssignHead {
    pub task_id: TaskId,
    pub kind: u8,
    pub priority: u8,
}

impl TaskAssignHead {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.task_id.raw());
        dst.put_u8(self.kind);
        dst.put_u8(self.priority);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 6)?;
        Ok(Self {
            task_id: TaskId::new(src.get_u32()),
            kind: src.get_u8(),
            priority: src.get_u8(),
        })
    }
}

/// Task-reclaim payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReclaim {
    pub task_id: TaskId,
    pub kind: u8,
}

impl TaskReclaim {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.task_id.raw());
        dst.put_u8(self.kind);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 5)?;
        Ok(Self { task_id: TaskId::new(src.get_u32()), kind: src.get_u8() })
    }
}

/// Generic head of a task-control payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskControlHead {
    pub task_id: TaskId,
    pub kind: u8,
    pub opt: u8,
}

impl TaskControlHead {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.task_id.raw());
        dst.put_u8(self.kind);
        dst.put_u8(self.opt);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 6)?;
        Ok(Self {
            task_id: TaskId::new(src.get_u32()),
            kind: src.get_u8(),
            opt: src.get_u8(),
        })
    }
}

/// Task-assign response: the relay endpoint the worker opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAssignResponse {
    pub task_id: TaskId,
    pub kind: u8,
    pub relay_addr: SocketAddr,
}

impl TaskAssignResponse {
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u32(self.task_id.raw());
        dst.put_u8(self.kind);
        encode_addr(self.relay_addr, dst)
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 5)?;
        let task_id = TaskId::new(src.get_u32());
        let kind = src.get_u8();
        let relay_addr = decode_addr(src)?;
        Ok(Self { task_id, kind, relay_addr })
    }
}

/// Turn-specific body of a task-assign: the group and its current
/// roster, addresses as last seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnAssign {
    pub group_id: GroupId,
    pub clients: Vec<(UserId, SocketAddr)>,
}

impl TurnAssign {
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u32(self.group_id.raw());
        dst.put_u32(self.clients.len() as u32);
        for (user_id, addr) in &self.clients {
            dst.put_u32(user_id.raw());
            encode_addr(*addr, dst)?;
        }
        Ok(())
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 8)?;
        let group_id = GroupId::new(src.get_u32());
        let count = src.get_u32() as usize;
        if count > huddle_core::limits::GROUP_MAX_USER {
            return Err(Error::InvalidInput("roster beyond group capacity"));
        }
        let mut clients = Vec::with_capacity(count);
        for _ in 0..count {
            need(src, 4)?;
            let user_id = UserId::new(src.get_u32());
            let addr = decode_addr(src)?;
            clients.push((user_id, addr));
        }
        Ok(Self { group_id, clients })
    }
}

/// Turn-specific body of a task-control: the affected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnControl {
    pub user_id: UserId,
    pub addr: SocketAddr,
}

impl TurnControl {
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u32(self.user_id.raw());
        encode_addr(self.addr, dst)
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 4)?;
        let user_id = UserId::new(src.get_u32());
        let addr = decode_addr(src)?;
        Ok(Self { user_id, addr })
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
