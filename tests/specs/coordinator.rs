// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator scenarios: solo group lifecycle and heartbeat-driven
//! liveness.

use std::time::Duration;

use huddle_core::UserId;
use huddle_serv::ServConfig;

use super::prelude::*;

/// One client logs in, creates a group, checks in, deletes the group.
/// The worker's task count rises and falls with the group.
#[tokio::test]
async fn solo_create_then_delete() {
    let platform = Platform::start(1).await;
    let (client, _events) = session(&platform).await;

    let user_id = client.login().await.expect("login");
    assert_eq!(user_id, UserId::new(1));
    assert_eq!(platform.center.clients().user_count(), 1);
    assert_eq!(platform.nodes[0].task_count(), 0);

    let group = client.create_group(true, "solo", None).await.expect("create");
    assert_eq!(group.group_id.raw(), 1);
    assert_eq!(group.task_id.raw(), 1);
    assert_ne!(group.relay_addr.port(), 0);
    assert_eq!(platform.nodes[0].task_count(), 1);

    client.checkin().expect("checkin");

    client.delete_group().expect("delete");
    wait_until(|| platform.center.clients().group_count() == 0).await;
    wait_until(|| platform.nodes[0].task_count() == 0).await;
    assert_eq!(platform.center.clients().user_count(), 1);

    client.shutdown();
    platform.stop();
}

/// Deleting a group pushes a notification to every other member.
#[tokio::test]
async fn delete_notifies_the_other_members() {
    let platform = Platform::start(1).await;
    let (owner, _owner_events) = session(&platform).await;
    let (guest, mut guest_events) = session(&platform).await;

    owner.login().await.expect("login");
    guest.login().await.expect("login");
    let group = owner.create_group(true, "shared", None).await.expect("create");
    guest.join_group(group.group_id, None).await.expect("join");

    owner.delete_group().expect("delete");

    loop {
        match next_event(&mut guest_events).await {
            huddle_client::ClientEvent::GroupDelete => break,
            _ => continue,
        }
    }
    assert_eq!(guest.session_state().group_id, None);

    owner.shutdown();
    guest.shutdown();
    platform.stop();
}

/// A silent client is dropped after the supervisor's grace period; a
/// beating one survives. Membership shrinks and the survivor remains.
#[tokio::test]
async fn heartbeat_death_is_an_implicit_logout() {
    let mut config = ServConfig::ephemeral();
    config.heartbeat_period = Duration::from_millis(200);
    let platform = Platform::start_with_config(1, config).await;

    let mut alive = RawClient::new(platform.client_addr()).await;
    let mut silent = RawClient::new(platform.client_addr()).await;
    let alive_id = alive.login().await;
    let silent_id = silent.login().await;
    assert_eq!(platform.center.clients().user_count(), 2);

    let (owner, _events) = session(&platform).await;
    let owner_id = owner.login().await.expect("login");
    let group = owner.create_group(true, "mixed", None).await.expect("create");

    // Both raw clients join over the wire.
    for (id, cli) in [(alive_id, &mut alive), (silent_id, &mut silent)] {
        let mut body = bytes::BytesMut::new();
        huddle_wire::JoinGroup {
            user_id: id,
            group_id: group.group_id,
            passwd: huddle_wire::GroupName::empty(),
        }
        .encode(&mut body);
        cli.request(huddle_wire::CliMsg::JoinGroup, &body).await;
    }
    wait_until(|| {
        platform
            .center
            .clients()
            .group_members(group.group_id)
            .map(|m| m.len())
            .unwrap_or(0)
            == 3
    })
    .await;

    // Keep two of three alive while the silent one starves. The owner
    // session's own heartbeat timer is tuned for the production
    // period, far too slow for this compressed supervisor, so its
    // beats are driven by hand as well.
    for _ in 0..12 {
        alive.heartbeat(alive_id).await;
        alive.heartbeat(owner_id).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    wait_until(|| platform.center.clients().user_count() == 2).await;
    assert!(platform
        .center
        .clients()
        .group_members(group.group_id)
        .expect("group alive")
        .iter()
        .all(|m| *m != silent_id));

    owner.shutdown();
    platform.stop();
}

/// LOGIN then LOGOUT leaves the user table where it started.
#[tokio::test]
async fn login_logout_round_trip() {
    let platform = Platform::start(1).await;
    let before = platform.center.clients().user_count();

    let (client, _events) = session(&platform).await;
    client.login().await.expect("login");
    assert_eq!(platform.center.clients().user_count(), before + 1);

    client.logout().expect("logout");
    wait_until(|| platform.center.clients().user_count() == before).await;

    client.shutdown();
    platform.stop();
}
