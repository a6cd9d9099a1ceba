// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The relay envelope clients exchange with task workers.
//!
//! Outer frame types on the relay socket are [`RelayMsg`]; a task-req
//! payload is the [`TaskReq`] envelope followed by one [`ClientPack`].
//! The worker forwards the inner pack verbatim under a turn-pack frame,
//! so both sides of the relay share these types.

use bytes::{Buf, BufMut, Bytes};
use huddle_core::{Error, Result, TaskId, UserId};

/// Frame types on the relay UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayMsg {
    TaskReq = 0,
    TurnPack = 1,
    /// Reserved for a direct peer-to-peer mode that is never produced.
    P2pPack = 2,
}

impl RelayMsg {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::TaskReq,
            1 => Self::TurnPack,
            2 => Self::P2pPack,
            _ => return None,
        })
    }
}

/// Inner pack types exchanged between clients through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PackKind {
    Checkin = 1,
    Command = 2,
    StateImg = 3,
}

impl PackKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Checkin,
            2 => Self::Command,
            3 => Self::StateImg,
            _ => return None,
        })
    }
}

/// Encoded width of the task-req envelope.
pub const TASK_REQ_HEAD_LEN: usize = 13;

/// Encoded width of the inner client-pack header.
pub const CLIENT_PACK_HEAD_LEN: usize = 8;

/// Fragment offsets occupy 22 bits of the packed word.
pub const FRAG_OFS_MAX: u32 = (1 << 22) - 1;

/// Fragment/command lengths occupy the low 10 bits of the packed word.
pub const PACK_DATA_MAX: usize = (1 << 10) - 1;

const FLAG_FRAG: u8 = 1 << 0;
const FLAG_MF: u8 = 1 << 1;

fn need(src: &impl Buf, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(Error::InvalidInput("short payload"));
    }
    Ok(())
}

/// Envelope addressed to a task on the relay socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReq {
    pub task_id: TaskId,
    pub user_id: UserId,
    /// Task kind the request targets (turn = 1).
    pub kind: u8,
    pub datalen: u32,
}

impl TaskReq {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.task_id.raw());
        dst.put_u32(self.user_id.raw());
        dst.put_u8(self.kind);
        dst.put_u32(self.datalen);
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        need(src, TASK_REQ_HEAD_LEN)?;
        Ok(Self {
            task_id: TaskId::new(src.get_u32()),
            user_id: UserId::new(src.get_u32()),
            kind: src.get_u8(),
            datalen: src.get_u32(),
        })
    }
}

/// The inner message one client sends another.
///
/// Every pack carries the fragment header; non-fragmented packs set
/// `frag = false` and use the packed length field for their payload
/// size, which caps commands at [`PACK_DATA_MAX`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPack {
    pub kind: PackKind,
    /// Fragment-set id; meaningful only when `frag` is set.
    pub seq: u16,
    pub frag: bool,
    /// More fragments follow. The terminal fragment clears this and
    /// fixes the total payload length at `ofs + data.len()`.
    pub mf: bool,
    pub ofs: u32,
    pub data: Bytes,
}

impl ClientPack {
    pub fn checkin() -> Self {
        Self { kind: PackKind::Checkin, seq: 0, frag: false, mf: false, ofs: 0, data: Bytes::new() }
    }

    pub fn command(data: Bytes) -> Result<Self> {
        if data.len() > PACK_DATA_MAX {
            return Err(Error::InvalidInput("command beyond pack capacity"));
        }
        Ok(Self { kind: PackKind::Command, seq: 0, frag: false, mf: false, ofs: 0, data })
    }

    pub fn fragment(seq: u16, ofs: u32, mf: bool, data: Bytes) -> Result<Self> {
        if data.len() > PACK_DATA_MAX {
            return Err(Error::InvalidInput("fragment beyond pack capacity"));
        }
        if ofs > FRAG_OFS_MAX {
            return Err(Error::InvalidInput("fragment offset beyond field"));
        }
        Ok(Self { kind: PackKind::StateImg, seq, frag: true, mf, ofs, data })
    }

    pub fn encoded_len(&self) -> usize {
        CLIENT_PACK_HEAD_LEN + self.data.len()
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut flags = 0u8;
        if self.frag {
            flags |= FLAG_FRAG;
        }
        if self.mf {
            flags |= FLAG_MF;
        }
        dst.put_u8(self.kind.code());
        dst.put_u16(self.seq);
        dst.put_u8(flags);
        dst.put_u32((self.ofs << 10) | self.data.len() as u32);
        dst.put_slice(&self.data);
    }

    pub fn decode(mut src: Bytes) -> Result<Self> {
        need(&src, CLIENT_PACK_HEAD_LEN)?;
        let kind = PackKind::from_code(src.get_u8())
            .ok_or(Error::InvalidInput("unknown pack kind"))?;
        let seq = src.get_u16();
        let flags = src.get_u8();
        let packed = src.get_u32();
        let ofs = packed >> 10;
        let len = (packed & 0x3ff) as usize;
        need(&src, len)?;
        let data = src.split_to(len);
        Ok(Self {
            kind,
            seq,
            frag: flags & FLAG_FRAG != 0,
            mf: flags & FLAG_MF != 0,
            ofs,
            data,
        })
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
