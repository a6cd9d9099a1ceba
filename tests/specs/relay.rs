// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay scenarios: fan-out, leave semantics, and fragmented state
//! images between real client sessions.

use std::time::Duration;

use huddle_client::ClientEvent;

use super::prelude::*;

/// A command from one running participant reaches every other running
/// participant byte-for-byte, and never echoes back.
#[tokio::test]
async fn command_fans_out_to_all_running_peers() {
    let platform = Platform::start(1).await;

    let (alice, mut alice_events) = session(&platform).await;
    let (bob, mut bob_events) = session(&platform).await;
    let (carol, mut carol_events) = session(&platform).await;

    alice.login().await.expect("login");
    bob.login().await.expect("login");
    carol.login().await.expect("login");

    let group = alice.create_group(true, "trio", None).await.expect("create");
    bob.join_group(group.group_id, None).await.expect("join");
    carol.join_group(group.group_id, None).await.expect("join");

    establish_running(&bob, &alice, &mut alice_events).await;
    establish_running(&carol, &alice, &mut alice_events).await;

    alice.send_command(b"fan-out").expect("send");

    for events in [&mut bob_events, &mut carol_events] {
        loop {
            match next_event(events).await {
                ClientEvent::Command(data) => {
                    assert_eq!(&data[..], b"fan-out");
                    break;
                }
                ClientEvent::Checkin => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    // The sender hears checkins but never its own command.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = alice_events.try_recv() {
        assert!(!matches!(event, ClientEvent::Command(_)));
    }

    alice.shutdown();
    bob.shutdown();
    carol.shutdown();
    platform.stop();
}

/// After leaving a group, a participant receives no further relay
/// traffic for it.
#[tokio::test]
async fn leaver_stops_receiving_relay_packets() {
    let platform = Platform::start(1).await;

    let (alice, _alice_events) = session(&platform).await;
    let (bob, mut bob_events) = session(&platform).await;

    alice.login().await.expect("login");
    bob.login().await.expect("login");
    let group = alice.create_group(true, "pair", None).await.expect("create");
    bob.join_group(group.group_id, None).await.expect("join");

    establish_running(&alice, &bob, &mut bob_events).await;

    alice.send_command(b"before").expect("send");
    loop {
        match next_event(&mut bob_events).await {
            ClientEvent::Command(data) => {
                assert_eq!(&data[..], b"before");
                break;
            }
            _ => continue,
        }
    }

    bob.leave_group().expect("leave");
    wait_until(|| {
        platform
            .center
            .clients()
            .group_members(group.group_id)
            .map(|m| m.len() == 1)
            .unwrap_or(false)
    })
    .await;
    // Give the leave control time to reach the worker.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while bob_events.try_recv().is_ok() {}

    alice.send_command(b"after").expect("send");
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = bob_events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::Command(_)),
            "left participant still receives relay traffic"
        );
    }

    alice.shutdown();
    bob.shutdown();
    platform.stop();
}

/// A 2000-byte state image travels as four fragments and arrives as
/// one identical payload.
#[tokio::test]
async fn state_image_round_trips_through_fragmentation() {
    let platform = Platform::start(1).await;

    let (alice, mut alice_events) = session(&platform).await;
    let (bob, mut bob_events) = session(&platform).await;

    alice.login().await.expect("login");
    bob.login().await.expect("login");
    let group = alice.create_group(true, "imaging", None).await.expect("create");
    bob.join_group(group.group_id, None).await.expect("join");

    establish_running(&bob, &alice, &mut alice_events).await;
    establish_running(&alice, &bob, &mut bob_events).await;

    let image: Vec<u8> = (0..2000u32).map(|i| (i * 7) as u8).collect();
    alice.send_state_img(&image).expect("send");

    loop {
        match next_event(&mut bob_events).await {
            ClientEvent::StateImage(data) => {
                assert_eq!(data.len(), 2000);
                assert_eq!(&data[..], &image[..]);
                break;
            }
            ClientEvent::Checkin => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(bob.defrag_timeouts(), 0);

    alice.shutdown();
    bob.shutdown();
    platform.stop();
}

/// Larger images survive too: 100 KiB crosses as ~200 fragments.
#[tokio::test]
async fn large_state_image_survives_the_relay() {
    let platform = Platform::start(1).await;

    let (alice, mut alice_events) = session(&platform).await;
    let (bob, mut bob_events) = session(&platform).await;

    alice.login().await.expect("login");
    bob.login().await.expect("login");
    let group = alice.create_group(true, "bulk", None).await.expect("create");
    bob.join_group(group.group_id, None).await.expect("join");

    establish_running(&bob, &alice, &mut alice_events).await;
    establish_running(&alice, &bob, &mut bob_events).await;

    let image: Vec<u8> = (0..100 * 1024u32).map(|i| (i ^ (i >> 8)) as u8).collect();
    alice.send_state_img(&image).expect("send");

    loop {
        match next_event(&mut bob_events).await {
            ClientEvent::StateImage(data) => {
                assert_eq!(&data[..], &image[..]);
                break;
            }
            ClientEvent::Checkin => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }

    alice.shutdown();
    bob.shutdown();
    platform.stop();
}
