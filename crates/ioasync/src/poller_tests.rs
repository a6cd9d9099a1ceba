// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;
use std::time::Duration;

/// Sink that records events and wakes waiting assertions.
struct RecordingSink {
    events: Mutex<Vec<(Token, String)>>,
    notify: Notify,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()), notify: Notify::new() })
    }

    async fn wait_for_event(&self) -> (Token, String) {
        loop {
            if let Some(ev) = self.events.lock().first().cloned() {
                return ev;
            }
            self.notify.notified().await;
        }
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, token: Token, event: IoEvent) {
        let tag = match event {
            IoEvent::Ready(ready) => format!("ready r={} w={}", ready.is_readable(), ready.is_writable()),
            IoEvent::Incoming(_, _) => "incoming".to_string(),
            IoEvent::Error(e) => format!("error {e}"),
        };
        self.events.lock().push((token, tag));
        self.notify.notify_one();
    }
}

fn spawn_run(poller: Arc<Poller>, sink: Arc<RecordingSink>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { poller.run(sink.as_ref()).await })
}

#[tokio::test]
async fn readable_event_is_dispatched() {
    let recv = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = recv.local_addr().unwrap();

    let poller = Arc::new(Poller::new());
    poller.add(7, Source::Udp(Arc::clone(&recv)));
    poller.enable(7, Want::READABLE);

    let sink = RecordingSink::new();
    let task = spawn_run(Arc::clone(&poller), Arc::clone(&sink));

    let send = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send.send_to(b"ping", addr).await.unwrap();

    let (token, tag) = tokio::time::timeout(Duration::from_secs(5), sink.wait_for_event())
        .await
        .unwrap();
    assert_eq!(token, 7);
    assert!(tag.contains("r=true"), "unexpected event {tag}");

    poller.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn disabled_interest_stays_silent() {
    let recv = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = recv.local_addr().unwrap();

    let poller = Arc::new(Poller::new());
    poller.add(1, Source::Udp(Arc::clone(&recv)));
    // Registered but never enabled: nothing may be dispatched.

    let sink = RecordingSink::new();
    let task = spawn_run(Arc::clone(&poller), Arc::clone(&sink));

    let send = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send.send_to(b"ping", addr).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.events.lock().is_empty());

    poller.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn incoming_connection_is_dispatched() {
    let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
    let addr = listener.local_addr().unwrap();

    let poller = Arc::new(Poller::new());
    poller.add(3, Source::Listener(Arc::clone(&listener)));
    poller.enable(3, Want::READABLE);

    let sink = RecordingSink::new();
    let task = spawn_run(Arc::clone(&poller), Arc::clone(&sink));

    let _client = TcpStream::connect(addr).await.unwrap();

    let (token, tag) = tokio::time::timeout(Duration::from_secs(5), sink.wait_for_event())
        .await
        .unwrap();
    assert_eq!(token, 3);
    assert_eq!(tag, "incoming");

    poller.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn removal_takes_effect_between_dispatches() {
    let recv = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = recv.local_addr().unwrap();

    let poller = Arc::new(Poller::new());
    poller.add(9, Source::Udp(Arc::clone(&recv)));
    poller.enable(9, Want::READABLE);

    let sink = RecordingSink::new();
    let task = spawn_run(Arc::clone(&poller), Arc::clone(&sink));

    let send = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send.send_to(b"one", addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), sink.wait_for_event()).await.unwrap();

    // The datagram was never drained, so the socket stays readable;
    // removal must still silence further dispatches.
    poller.remove(9);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let count = sink.events.lock().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.events.lock().len(), count);

    poller.stop();
    task.await.unwrap();
}
