// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the Huddle platform.
//!
//! Every message travels under a fixed 12-byte header (magic 0x2016,
//! version 1); payload bodies are hand-framed binary in network byte
//! order. Three payload families share the header: client↔coordinator
//! datagrams, coordinator↔node control frames over TCP, and the relay
//! envelope clients exchange with task workers.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod addr;
mod client;
mod frame;
mod node;
mod relay;

pub use addr::{decode_addr, encode_addr, WIRE_ADDR_LEN};
pub use client::{
    CliMsg, CoordMsg, ErrCode, GroupDesc, GroupFlags, GroupName, GroupOp, GroupRef, GroupResult,
    HandleErr, JoinGroup, ListGroup, NewGroup, UserRef,
};
pub use frame::{
    split_datagram, FrameDecoder, FrameHeader, CONTROL_FRAME_MAX, HEADER_LEN, MAGIC, VERSION,
};
pub use node::{
    CenterMsg, ControlOp, NodeMsg, TaskAssignHead, TaskAssignResponse, TaskControlHead,
    TaskReclaim, TurnAssign, TurnControl,
};
pub use relay::{
    ClientPack, PackKind, RelayMsg, TaskReq, CLIENT_PACK_HEAD_LEN, FRAG_OFS_MAX, PACK_DATA_MAX,
    TASK_REQ_HEAD_LEN,
};
