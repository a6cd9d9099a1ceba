// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler scenarios: load balancing across node servers.

use super::prelude::*;

/// Groups spread evenly across connected nodes: with three nodes and
/// thirty groups, every node ends within one task of the ideal share.
#[tokio::test]
async fn groups_balance_across_three_nodes() {
    let platform = Platform::start(3).await;
    let (client, _events) = session(&platform).await;
    client.login().await.expect("login");

    const GROUPS: usize = 30;
    for i in 0..GROUPS {
        client
            .create_group(true, &format!("g{i}"), None)
            .await
            .expect("create");
    }

    let loads = platform.center.nodes().node_loads();
    assert_eq!(loads.len(), 3);
    let total: usize = loads.iter().map(|(_, n)| n).sum();
    assert_eq!(total, GROUPS);

    let ideal = GROUPS / 3;
    for (node, count) in &loads {
        assert!(
            (*count as i64 - ideal as i64).abs() <= 1,
            "node {node} ended with {count} of {GROUPS} tasks"
        );
    }

    // The node servers agree with the coordinator's accounting.
    let node_total: usize = platform.nodes.iter().map(|n| n.task_count()).sum();
    assert_eq!(node_total, GROUPS);

    client.shutdown();
    platform.stop();
}

/// A reclaimed task frees its slot: deleting groups drains the nodes
/// back to zero.
#[tokio::test]
async fn reclaim_returns_capacity() {
    let platform = Platform::start(2).await;
    let (client, _events) = session(&platform).await;
    client.login().await.expect("login");

    let group = client.create_group(true, "fleeting", None).await.expect("create");
    assert_eq!(
        platform.center.nodes().node_loads().iter().map(|(_, n)| n).sum::<usize>(),
        1
    );

    client.delete_group().expect("delete");
    wait_until(|| platform.center.clients().group_count() == 0).await;
    wait_until(|| platform.nodes.iter().map(|n| n.task_count()).sum::<usize>() == 0).await;
    assert_eq!(
        platform.center.nodes().node_loads().iter().map(|(_, n)| n).sum::<usize>(),
        0
    );
    let _ = group;

    client.shutdown();
    platform.stop();
}
