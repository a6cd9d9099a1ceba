// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-wire socket addresses.
//!
//! Addresses inside payloads use a 16-byte form compatible with an
//! IPv4 `sockaddr_in`: family u16 (always 2), port u16, address u32,
//! then 8 octets of zero padding. Network byte order.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Buf, BufMut};
use huddle_core::{Error, Result};

/// Width of an address field inside any payload.
pub const WIRE_ADDR_LEN: usize = 16;

const AF_INET: u16 = 2;

pub fn encode_addr(addr: SocketAddr, dst: &mut impl BufMut) -> Result<()> {
    let v4 = match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => return Err(Error::InvalidInput("only IPv4 addresses travel")),
    };
    dst.put_u16(AF_INET);
    dst.put_u16(v4.port());
    dst.put_u32((*v4.ip()).into());
    dst.put_bytes(0, 8);
    Ok(())
}

pub fn decode_addr(src: &mut impl Buf) -> Result<SocketAddr> {
    if src.remaining() < WIRE_ADDR_LEN {
        return Err(Error::InvalidInput("short address field"));
    }
    let family = src.get_u16();
    if family != AF_INET {
        return Err(Error::InvalidInput("unsupported address family"));
    }
    let port = src.get_u16();
    let ip = Ipv4Addr::from(src.get_u32());
    src.advance(8);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn addr_round_trip() {
        let addr: SocketAddr = "192.168.1.10:8124".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_addr(addr, &mut buf).unwrap();
        assert_eq!(buf.len(), WIRE_ADDR_LEN);
        let decoded = decode_addr(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn rejects_ipv6() {
        let addr: SocketAddr = "[::1]:80".parse().unwrap();
        let mut buf = BytesMut::new();
        assert!(encode_addr(addr, &mut buf).is_err());
    }

    #[test]
    fn rejects_wrong_family() {
        let mut buf = BytesMut::new();
        buf.put_u16(10); // AF_INET6
        buf.put_bytes(0, 14);
        assert!(decode_addr(&mut buf.freeze()).is_err());
    }
}
