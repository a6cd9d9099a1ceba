// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The 12-byte header every Huddle message travels under, plus the
//! accumulator that recovers whole frames from a TCP byte stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use huddle_core::{Error, Result};

/// Protocol magic, first two octets of every frame.
pub const MAGIC: u16 = 0x2016;

/// Protocol version.
pub const VERSION: u8 = 1;

/// Fixed header length in octets.
pub const HEADER_LEN: usize = 12;

/// Largest payload accepted on a control stream. Datagram payloads are
/// naturally bounded by the packet buffer; streams need an explicit cap
/// so a corrupt length field cannot stall the decoder forever.
pub const CONTROL_FRAME_MAX: usize = 64 * 1024;

/// Parsed form of the fixed header.
///
/// Layout on the wire: magic u16, version u8, type u8, seq u16,
/// checksum u8 (reserved, zero), reserved u8, payload length u32.
/// Network byte order throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub seq: u16,
    pub datalen: u32,
}

impl FrameHeader {
    pub fn new(msg_type: u8, seq: u16, datalen: u32) -> Self {
        Self { msg_type, seq, datalen }
    }

    /// Stamp this header into `dst`, which must hold `HEADER_LEN` bytes.
    pub fn stamp(&self, dst: &mut [u8]) {
        let mut b = dst;
        b.put_u16(MAGIC);
        b.put_u8(VERSION);
        b.put_u8(self.msg_type);
        b.put_u16(self.seq);
        b.put_u8(0); // checksum, reserved
        b.put_u8(0);
        b.put_u32(self.datalen);
    }

    /// Append this header to a growable buffer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(self.msg_type);
        dst.put_u16(self.seq);
        dst.put_u8(0);
        dst.put_u8(0);
        dst.put_u32(self.datalen);
    }

    /// Parse and validate a header; mismatched magic or version is
    /// `InvalidInput` and the caller drops the packet.
    pub fn parse(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < HEADER_LEN {
            return Err(Error::InvalidInput("short frame header"));
        }
        if src.get_u16() != MAGIC {
            return Err(Error::InvalidInput("bad magic"));
        }
        if src.get_u8() != VERSION {
            return Err(Error::InvalidInput("bad version"));
        }
        let msg_type = src.get_u8();
        let seq = src.get_u16();
        let _chsum = src.get_u8();
        let _reserved = src.get_u8();
        let datalen = src.get_u32();
        Ok(Self { msg_type, seq, datalen })
    }
}

/// Split a datagram into header and payload, checking the declared
/// length against what actually arrived.
pub fn split_datagram(mut data: Bytes) -> Result<(FrameHeader, Bytes)> {
    let head = FrameHeader::parse(&mut data)?;
    if (data.len() as u64) < u64::from(head.datalen) {
        return Err(Error::InvalidInput("declared length beyond datagram"));
    }
    data.truncate(head.datalen as usize);
    Ok((head, data))
}

/// Incremental frame recovery for the coordinator↔node TCP stream.
///
/// Feed raw reads in; complete frames come out. A frame whose declared
/// payload exceeds [`CONTROL_FRAME_MAX`] poisons the stream (the caller
/// is expected to drop the connection).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<(FrameHeader, Bytes)>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let head = FrameHeader::parse(&mut &self.buf[..])?;
        let datalen = head.datalen as usize;
        if datalen > CONTROL_FRAME_MAX {
            return Err(Error::InvalidInput("control frame too large"));
        }
        if self.buf.len() < HEADER_LEN + datalen {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(datalen).freeze();
        Ok(Some((head, payload)))
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
