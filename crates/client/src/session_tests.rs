// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use huddle_serv::coord::{start_local_node, CenterServer};
use huddle_serv::{NodeServer, ServConfig};
use tokio::sync::mpsc;

async fn rig() -> (CenterServer, NodeServer) {
    let center = CenterServer::start(&ServConfig::ephemeral()).await.unwrap();
    let node = start_local_node(&center).await.unwrap();
    for _ in 0..200 {
        if center.nodes().node_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (center, node)
}

fn event_client(
    addr: SocketAddr,
) -> (
    impl std::future::Future<Output = Result<Client>>,
    mpsc::UnboundedReceiver<ClientEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fut = Client::connect(addr, move |ev| {
        let _ = tx.send(ev);
    });
    (fut, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn login_then_logout() {
    let (center, node) = rig().await;
    let (connect, _events) = event_client(center.client_addr());
    let client = connect.await.unwrap();

    let user_id = client.login().await.unwrap();
    assert!(user_id.is_valid());
    assert_eq!(center.clients().user_count(), 1);

    client.logout().unwrap();
    for _ in 0..200 {
        if center.clients().user_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(center.clients().user_count(), 0);
    assert_eq!(client.session_state(), SessionState::default());

    client.shutdown();
    node.shutdown();
    center.shutdown();
}

#[tokio::test]
async fn rejected_join_reports_and_times_out() {
    let (center, node) = rig().await;
    let (connect, mut events) = event_client(center.client_addr());
    let client = connect.await.unwrap();
    client.set_response_timeout(Duration::from_millis(500));

    client.login().await.unwrap();
    let err = client.join_group(GroupId::new(42), None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));

    // The early explanation arrived through the event callback.
    match next_event(&mut events).await {
        ClientEvent::Rejected(code) => assert_eq!(code, ErrCode::UnknownGroup),
        other => panic!("unexpected event {other:?}"),
    }

    client.shutdown();
    node.shutdown();
    center.shutdown();
}

#[tokio::test]
async fn command_reaches_the_peer_and_not_the_sender() {
    let (center, node) = rig().await;

    let (connect_a, mut events_a) = event_client(center.client_addr());
    let alice = connect_a.await.unwrap();
    let (connect_b, mut events_b) = event_client(center.client_addr());
    let bob = connect_b.await.unwrap();

    alice.login().await.unwrap();
    bob.login().await.unwrap();

    let group = alice.create_group(true, "pair", None).await.unwrap();
    bob.join_group(group.group_id, None).await.unwrap();

    alice.checkin().unwrap();
    // Bob's join control races his first checkin to the worker, so
    // repeat until his checkin is relayed back through alice.
    let mut bob_running = false;
    for _ in 0..50 {
        bob.checkin().unwrap();
        match tokio::time::timeout(Duration::from_millis(100), events_a.recv()).await {
            Ok(Some(ClientEvent::Checkin)) => {
                bob_running = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(bob_running, "bob never went running on the relay");

    alice.send_command(&[0x41, 0x42, 0x43]).unwrap();
    match next_event(&mut events_b).await {
        ClientEvent::Command(data) => assert_eq!(&data[..], &[0x41, 0x42, 0x43]),
        other => panic!("unexpected event {other:?}"),
    }

    // The sender never hears its own command back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events_a.try_recv() {
        assert!(
            !matches!(event, ClientEvent::Command(_)),
            "command echoed to its sender"
        );
    }

    alice.shutdown();
    bob.shutdown();
    node.shutdown();
    center.shutdown();
}

#[tokio::test]
async fn session_snapshot_survives_a_handoff() {
    let (center, node) = rig().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let (connect, _events) = event_client(center.client_addr());
    let client = connect.await.unwrap();
    client.login().await.unwrap();
    let group = client.create_group(true, "keep", None).await.unwrap();
    client.save_state(&path).unwrap();
    client.shutdown();

    // A second session picks the snapshot up and can talk to the same
    // relay without touching the coordinator again.
    let (connect, _events2) = event_client(center.client_addr());
    let revived = connect.await.unwrap();
    revived.restore_state(SessionState::load(&path).unwrap());
    let state = revived.session_state();
    assert_eq!(state.group_id, Some(group.group_id));
    assert_eq!(state.relay_addr, Some(group.relay_addr));
    revived.checkin().unwrap();

    revived.shutdown();
    node.shutdown();
    center.shutdown();
}
