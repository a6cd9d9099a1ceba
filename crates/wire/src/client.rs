// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client↔coordinator message bodies.
//!
//! Requests carry the sender's user id so the coordinator never relies
//! on source addresses for identity (addresses are only recorded at
//! login and refreshed from request sources).

use bytes::{Buf, BufMut, Bytes};
use huddle_core::limits::{GROUP_NAME_MAX, LIST_RESULT_MAX_LEN};
use huddle_core::{Error, GroupId, Result, TaskId, UserId};
use std::net::SocketAddr;

use crate::addr::{decode_addr, encode_addr};

/// Message types clients send to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliMsg {
    Ack = 0,
    Heartbeat = 1,
    Login = 2,
    Logout = 3,
    CreateGroup = 4,
    DeleteGroup = 5,
    ListGroup = 6,
    JoinGroup = 7,
    LeaveGroup = 8,
}

impl CliMsg {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ack,
            1 => Self::Heartbeat,
            2 => Self::Login,
            3 => Self::Logout,
            4 => Self::CreateGroup,
            5 => Self::DeleteGroup,
            6 => Self::ListGroup,
            7 => Self::JoinGroup,
            8 => Self::LeaveGroup,
            _ => return None,
        })
    }
}

/// Message types the coordinator sends to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordMsg {
    Ack = 0,
    LoginResponse = 1,
    CreateGroupResponse = 2,
    ListGroupResponse = 3,
    JoinGroupResponse = 4,
    GroupDelete = 5,
    HandleErr = 6,
}

impl CoordMsg {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ack,
            1 => Self::LoginResponse,
            2 => Self::CreateGroupResponse,
            3 => Self::ListGroupResponse,
            4 => Self::JoinGroupResponse,
            5 => Self::GroupDelete,
            6 => Self::HandleErr,
            _ => return None,
        })
    }
}

/// Why the coordinator rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrCode {
    UnknownUser = 1,
    UnknownGroup = 2,
    BadPassphrase = 3,
    GroupFull = 4,
    NoNode = 5,
    Internal = 6,
}

impl ErrCode {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::UnknownUser,
            2 => Self::UnknownGroup,
            3 => Self::BadPassphrase,
            4 => Self::GroupFull,
            5 => Self::NoNode,
            6 => Self::Internal,
            _ => return None,
        })
    }
}

/// Group behavior flags carried in create requests and descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupFlags(pub u16);

impl GroupFlags {
    pub const NEED_PASSWD: GroupFlags = GroupFlags(1 << 0);
    pub const OPENED: GroupFlags = GroupFlags(1 << 1);

    pub fn contains(self, other: GroupFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: GroupFlags) {
        self.0 |= other.0;
    }
}

/// Fixed-width 32-byte text field, NUL-terminated when shorter.
///
/// Used for both group names and passphrases. Longer inputs are
/// truncated, matching how the fields behave on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupName([u8; GROUP_NAME_MAX]);

impl GroupName {
    pub fn new(s: &str) -> Self {
        let mut buf = [0u8; GROUP_NAME_MAX];
        let n = s.len().min(GROUP_NAME_MAX);
        buf[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self(buf)
    }

    pub const fn empty() -> Self {
        Self([0u8; GROUP_NAME_MAX])
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(GROUP_NAME_MAX);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.0);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, GROUP_NAME_MAX)?;
        let mut buf = [0u8; GROUP_NAME_MAX];
        src.copy_to_slice(&mut buf);
        Ok(Self(buf))
    }
}

impl std::fmt::Debug for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

fn need(src: &impl Buf, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(Error::InvalidInput("short payload"));
    }
    Ok(())
}

/// Body carrying only a user id: logout, heartbeat, login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRef {
    pub user_id: UserId,
}

impl UserRef {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.user_id.raw());
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 4)?;
        Ok(Self { user_id: UserId::new(src.get_u32()) })
    }
}

/// Body carrying only a group id: the group-delete push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRef {
    pub group_id: GroupId,
}

impl GroupRef {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.group_id.raw());
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 4)?;
        Ok(Self { group_id: GroupId::new(src.get_u32()) })
    }
}

/// Create-group request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewGroup {
    pub user_id: UserId,
    pub flags: GroupFlags,
    pub name: GroupName,
    pub passwd: GroupName,
}

impl NewGroup {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.user_id.raw());
        dst.put_u16(self.flags.0);
        self.name.encode(dst);
        self.passwd.encode(dst);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 6)?;
        let user_id = UserId::new(src.get_u32());
        let flags = GroupFlags(src.get_u16());
        let name = GroupName::decode(src)?;
        let passwd = GroupName::decode(src)?;
        Ok(Self { user_id, flags, name, passwd })
    }
}

/// Delete-group and leave-group requests share this body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOp {
    pub user_id: UserId,
    pub group_id: GroupId,
}

impl GroupOp {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.user_id.raw());
        dst.put_u32(self.group_id.raw());
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 8)?;
        Ok(Self {
            user_id: UserId::new(src.get_u32()),
            group_id: GroupId::new(src.get_u32()),
        })
    }
}

/// List-group request: a page of descriptors starting at `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListGroup {
    pub user_id: UserId,
    pub pos: u32,
    pub count: u32,
}

impl ListGroup {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.user_id.raw());
        dst.put_u32(self.pos);
        dst.put_u32(self.count);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 12)?;
        Ok(Self {
            user_id: UserId::new(src.get_u32()),
            pos: src.get_u32(),
            count: src.get_u32(),
        })
    }
}

/// Join-group request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinGroup {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub passwd: GroupName,
}

impl JoinGroup {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.user_id.raw());
        dst.put_u32(self.group_id.raw());
        self.passwd.encode(dst);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 8)?;
        let user_id = UserId::new(src.get_u32());
        let group_id = GroupId::new(src.get_u32());
        let passwd = GroupName::decode(src)?;
        Ok(Self { user_id, group_id, passwd })
    }
}

/// Create-group and join-group responses share this body: the group,
/// its relay task, and the worker address participants should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupResult {
    pub group_id: GroupId,
    pub task_id: TaskId,
    pub relay_addr: SocketAddr,
}

impl GroupResult {
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u32(self.group_id.raw());
        dst.put_u32(self.task_id.raw());
        encode_addr(self.relay_addr, dst)
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 8)?;
        let group_id = GroupId::new(src.get_u32());
        let task_id = TaskId::new(src.get_u32());
        let relay_addr = decode_addr(src)?;
        Ok(Self { group_id, task_id, relay_addr })
    }
}

/// One entry of a list-group response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDesc {
    pub group_id: GroupId,
    pub flags: GroupFlags,
    pub name: String,
}

impl GroupDesc {
    pub fn encoded_len(&self) -> usize {
        4 + 2 + 4 + self.name.len()
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.group_id.raw());
        dst.put_u16(self.flags.0);
        dst.put_u32(self.name.len() as u32);
        dst.put_slice(self.name.as_bytes());
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        need(src, 10)?;
        let group_id = GroupId::new(src.get_u32());
        let flags = GroupFlags(src.get_u16());
        let namelen = src.get_u32() as usize;
        if namelen > GROUP_NAME_MAX {
            return Err(Error::InvalidInput("group name too long"));
        }
        need(src, namelen)?;
        let name = String::from_utf8_lossy(&src.split_to(namelen)).into_owned();
        Ok(Self { group_id, flags, name })
    }

    /// Decode a whole list-group response payload.
    pub fn decode_list(mut src: Bytes) -> Result<Vec<Self>> {
        if src.len() > LIST_RESULT_MAX_LEN {
            return Err(Error::InvalidInput("list response too large"));
        }
        let mut out = Vec::new();
        while src.has_remaining() {
            out.push(Self::decode(&mut src)?);
        }
        Ok(out)
    }
}

/// Negative response with a numeric reason. The request's sequence
/// number is echoed in the frame header so waiters can correlate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleErr {
    pub code: ErrCode,
}

impl HandleErr {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.code as u32);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, 4)?;
        let code = ErrCode::from_code(src.get_u32())
            .ok_or(Error::InvalidInput("unknown error code"))?;
        Ok(Self { code })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
