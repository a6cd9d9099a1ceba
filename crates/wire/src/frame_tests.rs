// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn header_bytes(head: FrameHeader) -> BytesMut {
    let mut buf = BytesMut::new();
    head.encode(&mut buf);
    buf
}

#[test]
fn header_round_trip() {
    let head = FrameHeader::new(4, 0x1234, 77);
    let buf = header_bytes(head);
    assert_eq!(buf.len(), HEADER_LEN);
    let parsed = FrameHeader::parse(&mut buf.freeze()).unwrap();
    assert_eq!(parsed, head);
}

#[test]
fn header_layout_is_fixed() {
    let buf = header_bytes(FrameHeader::new(2, 0x0102, 0x0a0b0c0d));
    assert_eq!(
        &buf[..],
        &[0x20, 0x16, 1, 2, 0x01, 0x02, 0, 0, 0x0a, 0x0b, 0x0c, 0x0d]
    );
}

#[test]
fn bad_magic_is_rejected() {
    let mut buf = header_bytes(FrameHeader::new(1, 0, 0));
    buf[0] = 0xff;
    assert!(FrameHeader::parse(&mut buf.freeze()).is_err());
}

#[test]
fn bad_version_is_rejected() {
    let mut buf = header_bytes(FrameHeader::new(1, 0, 0));
    buf[2] = 9;
    assert!(FrameHeader::parse(&mut buf.freeze()).is_err());
}

#[test]
fn stamp_matches_encode() {
    let head = FrameHeader::new(7, 42, 100);
    let mut fixed = [0u8; HEADER_LEN];
    head.stamp(&mut fixed);
    assert_eq!(&fixed[..], &header_bytes(head)[..]);
}

#[test]
fn split_datagram_truncates_to_declared_length() {
    let mut buf = header_bytes(FrameHeader::new(1, 0, 3));
    buf.extend_from_slice(b"abcdef"); // trailing garbage past datalen
    let (head, payload) = split_datagram(buf.freeze()).unwrap();
    assert_eq!(head.datalen, 3);
    assert_eq!(&payload[..], b"abc");
}

#[test]
fn split_datagram_rejects_short_payload() {
    let mut buf = header_bytes(FrameHeader::new(1, 0, 10));
    buf.extend_from_slice(b"abc");
    assert!(split_datagram(buf.freeze()).is_err());
}

#[test]
fn decoder_reassembles_across_feeds() {
    let mut encoded = header_bytes(FrameHeader::new(3, 9, 4));
    encoded.extend_from_slice(b"wxyz");

    let mut dec = FrameDecoder::new();
    // Byte-at-a-time: no frame until the last byte lands.
    for (i, b) in encoded.iter().enumerate() {
        dec.feed(&[*b]);
        if i + 1 < encoded.len() {
            assert!(dec.next_frame().unwrap().is_none());
        }
    }
    let (head, payload) = dec.next_frame().unwrap().unwrap();
    assert_eq!(head.msg_type, 3);
    assert_eq!(head.seq, 9);
    assert_eq!(&payload[..], b"wxyz");
    assert!(dec.next_frame().unwrap().is_none());
}

#[test]
fn decoder_yields_back_to_back_frames() {
    let mut stream = header_bytes(FrameHeader::new(1, 1, 2));
    stream.extend_from_slice(b"aa");
    let second = header_bytes(FrameHeader::new(2, 2, 0));
    stream.extend_from_slice(&second);

    let mut dec = FrameDecoder::new();
    dec.feed(&stream);
    let (h1, p1) = dec.next_frame().unwrap().unwrap();
    assert_eq!((h1.msg_type, &p1[..]), (1, &b"aa"[..]));
    let (h2, p2) = dec.next_frame().unwrap().unwrap();
    assert_eq!((h2.msg_type, p2.len()), (2, 0));
}

#[test]
fn decoder_poisons_on_oversize_frame() {
    let mut dec = FrameDecoder::new();
    let buf = header_bytes(FrameHeader::new(1, 0, (CONTROL_FRAME_MAX + 1) as u32));
    dec.feed(&buf);
    assert!(dec.next_frame().is_err());
}
