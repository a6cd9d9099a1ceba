// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures: an in-process platform (coordinator plus nodes) and
//! client helpers.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use huddle_client::{Client, ClientEvent};
use huddle_core::UserId;
use huddle_serv::coord::{start_local_node, CenterServer};
use huddle_serv::{NodeServer, ServConfig};
use huddle_wire::{CliMsg, CoordMsg, FrameHeader, UserRef};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub struct Platform {
    pub center: CenterServer,
    pub nodes: Vec<NodeServer>,
}

impl Platform {
    /// Coordinator plus `nodes` node servers, all on ephemeral ports.
    pub async fn start(nodes: usize) -> Platform {
        Self::start_with_config(nodes, ServConfig::ephemeral()).await
    }

    pub async fn start_with_config(nodes: usize, config: ServConfig) -> Platform {
        let center = CenterServer::start(&config).await.expect("center start");
        let mut servers = Vec::new();
        for _ in 0..nodes {
            servers.push(start_local_node(&center).await.expect("node start"));
        }
        wait_until(|| center.nodes().node_count() == nodes).await;
        Platform { center, nodes: servers }
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.center.client_addr()
    }

    pub fn stop(self) {
        for node in &self.nodes {
            node.shutdown();
        }
        self.center.shutdown();
    }
}

/// Poll until `probe` holds or a generous deadline passes.
pub async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..400 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never became true");
}

/// A full client session with its events drained into a channel.
pub async fn session(platform: &Platform) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = Client::connect(platform.client_addr(), move |ev| {
        let _ = tx.send(ev);
    })
    .await
    .expect("client connect");
    (client, rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Check both peers in until the relay forwards between them: both
/// repeat their checkins (join controls race first checkins to the
/// worker) until `b` observes one from `a`.
pub async fn establish_running(
    a: &Client,
    b: &Client,
    b_events: &mut mpsc::UnboundedReceiver<ClientEvent>,
) {
    for _ in 0..50 {
        b.checkin().expect("checkin");
        a.checkin().expect("checkin");
        match tokio::time::timeout(Duration::from_millis(100), b_events.recv()).await {
            Ok(Some(ClientEvent::Checkin)) => return,
            _ => continue,
        }
    }
    panic!("relay never started forwarding");
}

/// A bare-socket client for scenarios that need manual control of
/// heartbeats and framing.
pub struct RawClient {
    pub socket: UdpSocket,
    coord: SocketAddr,
    seq: u16,
}

impl RawClient {
    pub async fn new(coord: SocketAddr) -> RawClient {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        RawClient { socket, coord, seq: 0 }
    }

    pub async fn request(&mut self, msg: CliMsg, body: &[u8]) {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let mut buf = BytesMut::new();
        FrameHeader::new(msg.code(), seq, body.len() as u32).encode(&mut buf);
        buf.extend_from_slice(body);
        self.socket.send_to(&buf, self.coord).await.expect("send");
    }

    pub async fn login(&mut self) -> UserId {
        self.request(CliMsg::Login, &[]).await;
        let mut buf = vec![0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .expect("login timed out")
            .expect("recv");
        let (head, payload) =
            huddle_wire::split_datagram(bytes::Bytes::copy_from_slice(&buf[..n])).expect("frame");
        assert_eq!(CoordMsg::from_code(head.msg_type), Some(CoordMsg::LoginResponse));
        UserRef::decode(&mut payload.clone()).expect("body").user_id
    }

    pub async fn heartbeat(&mut self, user_id: UserId) {
        let mut body = BytesMut::new();
        UserRef { user_id }.encode(&mut body);
        self.request(CliMsg::Heartbeat, &body).await;
    }
}
