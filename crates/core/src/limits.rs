// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol constants and platform limits.

use std::time::Duration;

/// UDP port the coordinator listens on for client traffic.
pub const CLIENT_LOGIN_PORT: u16 = 8123;

/// TCP port the coordinator listens on for node-server control streams.
pub const NODE_SERV_LOGIN_PORT: u16 = 9123;

/// Fixed width of a group name on the wire, NUL-padded when shorter.
pub const GROUP_NAME_MAX: usize = 32;

/// Fixed width of a group passphrase on the wire.
pub const GROUP_PASSWD_MAX: usize = 32;

/// Hard cap on group membership; the 9th join is rejected.
pub const GROUP_MAX_USER: usize = 8;

/// Tasks one task worker hosts before the node spawns another.
pub const WORKER_MAX_TASK_COUNT: usize = 512;

/// Capacity of a pooled packet buffer, header included.
pub const PACKET_MAX_PAYLOAD: usize = 2000;

/// Largest fragment a client emits when splitting a state image.
pub const CLI_FRAGMENT_MAX_LEN: usize = 512;

/// Largest state image a client accepts for splitting.
pub const CLI_DATA_MAX_LEN: usize = 4 * 1024 * 1024;

/// Upper bound on any reassembled payload; fragments claiming offsets
/// beyond this are malformed.
pub const DATA_MAX_LEN: usize = 1024 * 1024 * 1024;

/// A LIST_GROUP response stops packing descriptors at this many bytes.
pub const LIST_RESULT_MAX_LEN: usize = 4000;

/// Default deadline a caller waits for a correlated response.
pub const WAIT_RES_DEADLINE: Duration = Duration::from_secs(5);

/// Reassembly queues are discarded after this long without completing.
pub const DEFRAG_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between heartbeat ticks, client send and supervisor decay.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);

/// Missed ticks before a participant is declared dead.
pub const HEARTBEAT_INIT: i32 = 3;

/// Task priorities; only normal is produced today.
pub const TASK_PRIORITY_MIN: u8 = 0;
pub const TASK_PRIORITY_MAX: u8 = 8;
pub const TASK_PRIORITY_NORMAL: u8 = TASK_PRIORITY_MIN;

/// The turn relay task kind, the only kind defined.
pub const TASK_TURN: u8 = 1;
