// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{BufMut, Bytes, BytesMut};
use super::*;

#[test]
fn group_name_pads_and_terminates() {
    let name = GroupName::new("lobby");
    let mut buf = BytesMut::new();
    name.encode(&mut buf);
    assert_eq!(buf.len(), GROUP_NAME_MAX);
    assert_eq!(&buf[..5], b"lobby");
    assert!(buf[5..].iter().all(|&b| b == 0));
    assert_eq!(name.as_str(), "lobby");
}

#[test]
fn group_name_truncates_long_input() {
    let long = "x".repeat(GROUP_NAME_MAX + 10);
    let name = GroupName::new(&long);
    assert_eq!(name.as_str().len(), GROUP_NAME_MAX);
}

#[test]
fn new_group_round_trip() {
    let mut flags = GroupFlags::OPENED;
    flags.insert(GroupFlags::NEED_PASSWD);
    let req = NewGroup {
        user_id: UserId::new(3),
        flags,
        name: GroupName::new("arena"),
        passwd: GroupName::new("hunter2"),
    };
    let mut buf = BytesMut::new();
    req.encode(&mut buf);
    assert_eq!(buf.len(), 4 + 2 + GROUP_NAME_MAX * 2);
    let decoded = NewGroup::decode(&mut buf.freeze()).unwrap();
    assert_eq!(decoded, req);
    assert!(decoded.flags.contains(GroupFlags::NEED_PASSWD));
}

#[test]
fn group_result_round_trip() {
    let res = GroupResult {
        group_id: GroupId::new(1),
        task_id: TaskId::new(9),
        relay_addr: "10.0.0.1:30000".parse().unwrap(),
    };
    let mut buf = BytesMut::new();
    res.encode(&mut buf).unwrap();
    let decoded = GroupResult::decode(&mut buf.freeze()).unwrap();
    assert_eq!(decoded, res);
}

#[test]
fn group_desc_list_round_trip() {
    let descs = vec![
        GroupDesc { group_id: GroupId::new(1), flags: GroupFlags::OPENED, name: "a".into() },
        GroupDesc { group_id: GroupId::new(2), flags: GroupFlags::default(), name: "longer".into() },
    ];
    let mut buf = BytesMut::new();
    for d in &descs {
        d.encode(&mut buf);
    }
    let decoded = GroupDesc::decode_list(buf.freeze()).unwrap();
    assert_eq!(decoded, descs);
}

#[test]
fn group_desc_rejects_absurd_name_length() {
    let mut buf = BytesMut::new();
    buf.put_u32(1);
    buf.put_u16(0);
    buf.put_u32(10_000);
    assert!(GroupDesc::decode_list(buf.freeze()).is_err());
}

#[test]
fn handle_err_round_trip() {
    let err = HandleErr { code: ErrCode::GroupFull };
    let mut buf = BytesMut::new();
    err.encode(&mut buf);
    let decoded = HandleErr::decode(&mut buf.freeze()).unwrap();
    assert_eq!(decoded.code, ErrCode::GroupFull);
}

#[yare::parameterized(
    heartbeat = { 1, Some(CliMsg::Heartbeat) },
    login = { 2, Some(CliMsg::Login) },
    leave = { 8, Some(CliMsg::LeaveGroup) },
    unknown = { 99, None },
)]
fn cli_msg_codes(code: u8, expected: Option<CliMsg>) {
    assert_eq!(CliMsg::from_code(code), expected);
    if let Some(msg) = expected {
        assert_eq!(msg.code(), code);
    }
}

#[test]
fn truncated_bodies_are_invalid() {
    let mut short = Bytes::from_static(&[0u8; 3]);
    assert!(UserRef::decode(&mut short.clone()).is_err());
    assert!(GroupOp::decode(&mut short.clone()).is_err());
    assert!(ListGroup::decode(&mut short.clone()).is_err());
    assert!(JoinGroup::decode(&mut short).is_err());
}
