// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{Bytes, BytesMut};
use super::*;

#[test]
fn task_req_round_trip() {
    let req = TaskReq { task_id: TaskId::new(4), user_id: UserId::new(2), kind: 1, datalen: 20 };
    let mut buf = BytesMut::new();
    req.encode(&mut buf);
    assert_eq!(buf.len(), TASK_REQ_HEAD_LEN);
    let decoded = TaskReq::decode(&mut buf.freeze()).unwrap();
    assert_eq!(decoded, req);
}

#[test]
fn checkin_pack_is_empty() {
    let pack = ClientPack::checkin();
    let mut buf = BytesMut::new();
    pack.encode(&mut buf);
    assert_eq!(buf.len(), CLIENT_PACK_HEAD_LEN);
    let decoded = ClientPack::decode(buf.freeze()).unwrap();
    assert_eq!(decoded.kind, PackKind::Checkin);
    assert!(decoded.data.is_empty());
}

#[test]
fn command_pack_round_trip() {
    let pack = ClientPack::command(Bytes::from_static(b"ABC")).unwrap();
    let mut buf = BytesMut::new();
    pack.encode(&mut buf);
    let decoded = ClientPack::decode(buf.freeze()).unwrap();
    assert_eq!(decoded.kind, PackKind::Command);
    assert!(!decoded.frag);
    assert_eq!(&decoded.data[..], b"ABC");
}

#[test]
fn command_rejects_oversized_payload() {
    let big = Bytes::from(vec![0u8; PACK_DATA_MAX + 1]);
    assert!(ClientPack::command(big).is_err());
}

#[yare::parameterized(
    first = { 0u32, true },
    middle = { 1024, true },
    last = { 1536, false },
)]
fn fragment_pack_round_trip(ofs: u32, mf: bool) {
    let data = Bytes::from(vec![7u8; 512]);
    let pack = ClientPack::fragment(3, ofs, mf, data.clone()).unwrap();
    let mut buf = BytesMut::new();
    pack.encode(&mut buf);
    let decoded = ClientPack::decode(buf.freeze()).unwrap();
    assert_eq!(decoded.kind, PackKind::StateImg);
    assert!(decoded.frag);
    assert_eq!(decoded.mf, mf);
    assert_eq!(decoded.ofs, ofs);
    assert_eq!(decoded.seq, 3);
    assert_eq!(decoded.data, data);
}

#[test]
fn fragment_offset_field_is_bounded() {
    let data = Bytes::from_static(b"x");
    assert!(ClientPack::fragment(0, FRAG_OFS_MAX, false, data.clone()).is_ok());
    assert!(ClientPack::fragment(0, FRAG_OFS_MAX + 1, false, data).is_err());
}

#[test]
fn packed_word_keeps_offset_and_length_disjoint() {
    let pack = ClientPack::fragment(1, FRAG_OFS_MAX, true, Bytes::from(vec![0u8; PACK_DATA_MAX]))
        .unwrap();
    let mut buf = BytesMut::new();
    pack.encode(&mut buf);
    let decoded = ClientPack::decode(buf.freeze()).unwrap();
    assert_eq!(decoded.ofs, FRAG_OFS_MAX);
    assert_eq!(decoded.data.len(), PACK_DATA_MAX);
}

#[test]
fn truncated_pack_is_invalid() {
    let mut buf = BytesMut::new();
    ClientPack::command(Bytes::from_static(b"hello")).unwrap().encode(&mut buf);
    let short = buf.freeze().slice(..CLIENT_PACK_HEAD_LEN + 2);
    assert!(ClientPack::decode(short).is_err());
}
