// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across component boundaries.
//!
//! Components never swallow one of these above their handler callback;
//! they either recover locally (drop and count) or propagate with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad magic or version, length beyond capacity,
    /// offsets past the payload cap. Recovered locally by dropping.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Unknown task, user, group, or an uncorrelated response.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Duplicate insertion, e.g. a fragment offset already queued.
    #[error("already exists")]
    AlreadyExists,

    /// A wait exceeded its deadline; partial state has been freed.
    #[error("timed out")]
    Timeout,

    /// A bounded resource ran dry: pool in limited mode, full group,
    /// saturated worker. The caller decides whether to retry.
    #[error("resource exhausted: {0}")]
    Exhausted(&'static str),

    /// Syscall-level failure. Datagram paths drop and continue; stream
    /// paths close the handler.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors a datagram path absorbs by dropping the packet.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::AlreadyExists
        )
    }
}
