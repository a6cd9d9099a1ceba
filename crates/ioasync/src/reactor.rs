// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-socket handler objects over the poller: streams, acceptors, and
//! datagram sockets, each with an outbound FIFO and graceful shutdown.
//!
//! Handlers are created against a running [`IoAsync`] instance and hand
//! every received packet to their user callback. `send`/`sendto` may be
//! called from any thread; they deposit a frozen packet on the
//! handler's FIFO and return, and the reactor drains the FIFO as the
//! socket accepts writes. No lock is held while a user callback runs.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::io::Ready;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, trace, warn};

use crate::pool::{Packet, PacketBuf, PacketPool};
use crate::poller::{EventSink, IoEvent, Poller, Source, Token, Want};

type DataFn = Box<dyn Fn(Packet) + Send + Sync>;
type DatagramFn = Box<dyn Fn(Packet, SocketAddr) + Send + Sync>;
type AcceptFn = Box<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;
type CloseFn = Box<dyn Fn() + Send + Sync>;

/// One reactor: a poller loop plus the handlers registered on it.
///
/// Cheap to clone; all clones drive the same loop. Each node-side task
/// worker runs its own instance, as does the coordinator and each
/// client.
#[derive(Clone)]
pub struct IoAsync {
    inner: Arc<Reactor>,
}

struct Reactor {
    poller: Poller,
    pool: PacketPool,
    active: Mutex<HashMap<Token, Arc<IoHandler>>>,
    closing: Mutex<HashMap<Token, Arc<IoHandler>>>,
    next_token: AtomicUsize,
}

impl IoAsync {
    /// Create the reactor and spawn its poller loop.
    pub fn start(pool: PacketPool) -> Self {
        let inner = Arc::new(Reactor {
            poller: Poller::new(),
            pool,
            active: Mutex::new(HashMap::new()),
            closing: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
        });
        let run = Arc::clone(&inner);
        tokio::spawn(async move { run.poller.run(run.as_ref()).await });
        Self { inner }
    }

    pub fn pool(&self) -> &PacketPool {
        &self.inner.pool
    }

    /// Take a writable buffer from the reactor's pool.
    pub fn alloc(&self) -> huddle_core::Result<PacketBuf> {
        self.inner.pool.alloc()
    }

    /// Attach a connected stream socket.
    pub fn stream(
        &self,
        stream: TcpStream,
        on_data: impl Fn(Packet) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Arc<IoHandler> {
        let stream = Arc::new(stream);
        self.register(
            Source::Tcp(Arc::clone(&stream)),
            HandlerKind::Stream { stream, on_data: Box::new(on_data) },
            Box::new(on_close),
        )
    }

    /// Attach a listening socket; accepted connections are handed to
    /// `on_accept` for the caller to wrap in its own handler.
    pub fn acceptor(
        &self,
        listener: TcpListener,
        on_accept: impl Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Arc<IoHandler> {
        let listener = Arc::new(listener);
        self.register(
            Source::Listener(Arc::clone(&listener)),
            HandlerKind::Accept { listener, on_accept: Box::new(on_accept) },
            Box::new(on_close),
        )
    }

    /// Attach a datagram socket; the source address of each datagram
    /// rides along with the packet.
    pub fn datagram(
        &self,
        socket: UdpSocket,
        on_packet: impl Fn(Packet, SocketAddr) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Arc<IoHandler> {
        let socket = Arc::new(socket);
        self.register(
            Source::Udp(Arc::clone(&socket)),
            HandlerKind::Datagram { socket, on_packet: Box::new(on_packet) },
            Box::new(on_close),
        )
    }

    fn register(&self, source: Source, kind: HandlerKind, on_close: CloseFn) -> Arc<IoHandler> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::new(IoHandler {
            token,
            reactor: Arc::downgrade(&self.inner),
            kind,
            on_close,
            state: Mutex::new(HandlerState::default()),
        });
        self.inner.active.lock().insert(token, Arc::clone(&handler));
        self.inner.poller.add(token, source);
        self.inner.poller.enable(token, Want::READABLE);
        handler
    }

    /// Stop the poller loop and drop every handler without flushing.
    pub fn shutdown(&self) {
        self.inner.poller.stop();
        self.inner.active.lock().clear();
        self.inner.closing.lock().clear();
    }
}

impl std::fmt::Debug for IoAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoAsync")
            .field("active", &self.inner.active.lock().len())
            .field("closing", &self.inner.closing.lock().len())
            .finish()
    }
}

enum HandlerKind {
    Stream { stream: Arc<TcpStream>, on_data: DataFn },
    Accept { listener: Arc<TcpListener>, on_accept: AcceptFn },
    Datagram { socket: Arc<UdpSocket>, on_packet: DatagramFn },
}

#[derive(Default)]
struct HandlerState {
    fifo: VecDeque<OutPacket>,
    /// Bytes of the head packet already written (stream mode).
    head_ofs: usize,
    closing: bool,
    dead: bool,
    /// Graceful shutdown blocks the close callback.
    close_suppressed: bool,
    close_fired: bool,
}

struct OutPacket {
    packet: Packet,
    dest: Option<SocketAddr>,
}

/// One socket under reactor management.
pub struct IoHandler {
    token: Token,
    reactor: Weak<Reactor>,
    kind: HandlerKind,
    on_close: CloseFn,
    state: Mutex<HandlerState>,
}

impl IoHandler {
    /// Queue a packet on a stream handler. Never blocks.
    pub fn send(&self, packet: Packet) {
        self.enqueue(packet, None);
    }

    /// Queue a datagram for `to`. Never blocks.
    pub fn sendto(&self, packet: Packet, to: SocketAddr) {
        self.enqueue(packet, Some(to));
    }

    fn enqueue(&self, packet: Packet, dest: Option<SocketAddr>) {
        {
            let mut st = self.state.lock();
            if st.dead || st.closing {
                debug!(token = self.token, "send on closing handler dropped");
                return;
            }
            st.fifo.push_back(OutPacket { packet, dest });
        }
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.poller.enable(self.token, Want::WRITABLE);
        }
    }

    /// Graceful shutdown: stop reading, suppress the close callback,
    /// and let queued writes drain before the handler is freed.
    pub fn shutdown(&self) {
        let drained = {
            let mut st = self.state.lock();
            if st.dead || st.closing {
                return;
            }
            st.closing = true;
            st.close_suppressed = true;
            st.fifo.is_empty()
        };
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.move_to_closing(self.token);
            reactor.poller.disable(self.token, Want::READABLE);
            if drained {
                reactor.destroy(self.token);
            }
        }
    }

    /// Immediate teardown; queued writes are dropped.
    pub fn close(&self) {
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.destroy(self.token);
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.kind {
            HandlerKind::Stream { stream, .. } => stream.local_addr(),
            HandlerKind::Accept { listener, .. } => listener.local_addr(),
            HandlerKind::Datagram { socket, .. } => socket.local_addr(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.kind {
            HandlerKind::Stream { stream, .. } => stream.peer_addr(),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a stream")),
        }
    }

    /// Queued outbound packets (tests and load probes).
    pub fn backlog(&self) -> usize {
        self.state.lock().fifo.len()
    }
}

impl std::fmt::Debug for IoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoHandler").field("token", &self.token).finish()
    }
}

impl Reactor {
    fn lookup(&self, token: Token) -> Option<Arc<IoHandler>> {
        if let Some(h) = self.active.lock().get(&token) {
            return Some(Arc::clone(h));
        }
        self.closing.lock().get(&token).cloned()
    }

    fn move_to_closing(&self, token: Token) {
        if let Some(h) = self.active.lock().remove(&token) {
            self.closing.lock().insert(token, h);
        }
    }

    fn destroy(&self, token: Token) {
        let handler = {
            let from_active = self.active.lock().remove(&token);
            from_active.or_else(|| self.closing.lock().remove(&token))
        };
        self.poller.remove(token);
        if let Some(handler) = handler {
            let fire = {
                let mut st = handler.state.lock();
                let fire = !st.dead && !st.close_suppressed && !st.close_fired;
                st.dead = true;
                if fire {
                    st.close_fired = true;
                }
                fire
            };
            if fire {
                (handler.on_close)();
            }
        }
    }

    fn handle_readable(&self, handler: &Arc<IoHandler>) {
        match &handler.kind {
            HandlerKind::Datagram { socket, on_packet } => {
                let mut pkb = match self.pool.alloc() {
                    Ok(pkb) => pkb,
                    Err(e) => {
                        warn!(error = %e, "recv skipped, no packet buffer");
                        return;
                    }
                };
                let cap = self.pool.buf_size();
                let buf = pkb.buf_mut();
                buf.resize(cap, 0);
                match socket.try_recv_from(&mut buf[..]) {
                    Ok((n, from)) => {
                        buf.truncate(n);
                        trace!(token = handler.token, len = n, %from, "datagram in");
                        on_packet(pkb.freeze(), from);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => warn!(token = handler.token, error = %e, "recvfrom failed"),
                }
            }
            HandlerKind::Stream { stream, on_data } => {
                let mut pkb = match self.pool.alloc() {
                    Ok(pkb) => pkb,
                    Err(e) => {
                        warn!(error = %e, "read skipped, no packet buffer");
                        return;
                    }
                };
                let cap = self.pool.buf_size();
                let buf = pkb.buf_mut();
                buf.resize(cap, 0);
                match stream.try_read(&mut buf[..]) {
                    Ok(0) => {
                        drop(pkb);
                        debug!(token = handler.token, "peer closed stream");
                        self.destroy(handler.token);
                    }
                    Ok(n) => {
                        buf.truncate(n);
                        trace!(token = handler.token, len = n, "stream in");
                        on_data(pkb.freeze());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!(token = handler.token, error = %e, "stream read failed");
                        self.destroy(handler.token);
                    }
                }
            }
            // Accepted connections arrive as IoEvent::Incoming.
            HandlerKind::Accept { .. } => {}
        }
    }

    fn handle_writable(&self, handler: &Arc<IoHandler>) {
        loop {
            let head = {
                let st = handler.state.lock();
                st.fifo.front().map(|op| (op.packet.clone(), op.dest, st.head_ofs))
            };
            let Some((packet, dest, head_ofs)) = head else {
                self.outbound_drained(handler);
                return;
            };
            match &handler.kind {
                HandlerKind::Datagram { socket, .. } => {
                    let Some(dest) = dest else {
                        warn!(token = handler.token, "datagram without destination dropped");
                        self.pop_head(handler);
                        continue;
                    };
                    match socket.try_send_to(&packet, dest) {
                        Ok(n) if n == packet.len() => {
                            trace!(token = handler.token, len = n, %dest, "datagram out");
                            self.pop_head(handler);
                        }
                        Ok(n) => {
                            warn!(
                                token = handler.token,
                                sent = n,
                                len = packet.len(),
                                "partial datagram write, packet dropped"
                            );
                            self.pop_head(handler);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                        Err(e) => {
                            warn!(token = handler.token, error = %e, "sendto failed, packet dropped");
                            self.pop_head(handler);
                        }
                    }
                }
                HandlerKind::Stream { stream, .. } => {
                    match stream.try_write(&packet[head_ofs..]) {
                        Ok(n) => {
                            let mut st = handler.state.lock();
                            st.head_ofs += n;
                            if st.head_ofs >= packet.len() {
                                st.fifo.pop_front();
                                st.head_ofs = 0;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                        Err(e) => {
                            warn!(token = handler.token, error = %e, "stream write failed");
                            self.destroy(handler.token);
                            return;
                        }
                    }
                }
                HandlerKind::Accept { .. } => return,
            }
        }
    }

    fn pop_head(&self, handler: &Arc<IoHandler>) {
        let mut st = handler.state.lock();
        st.fifo.pop_front();
        st.head_ofs = 0;
    }

    /// FIFO ran dry: drop write interest, and free the handler if it
    /// was draining toward shutdown.
    fn outbound_drained(&self, handler: &Arc<IoHandler>) {
        self.poller.disable(handler.token, Want::WRITABLE);
        let closing = handler.state.lock().closing;
        if closing {
            self.destroy(handler.token);
        }
    }
}

impl EventSink for Reactor {
    fn on_event(&self, token: Token, event: IoEvent) {
        let Some(handler) = self.lookup(token) else {
            self.poller.remove(token);
            return;
        };
        match event {
            IoEvent::Incoming(stream, addr) => {
                if let HandlerKind::Accept { on_accept, .. } = &handler.kind {
                    debug!(token, %addr, "accepted connection");
                    on_accept(stream, addr);
                }
            }
            IoEvent::Ready(ready) => self.dispatch_ready(&handler, ready),
            IoEvent::Error(e) => {
                warn!(token, error = %e, "socket readiness failed");
                self.destroy(token);
            }
        }
    }
}

impl Reactor {
    fn dispatch_ready(&self, handler: &Arc<IoHandler>, ready: Ready) {
        // Pending data drains before a closed socket is torn down.
        if ready.is_readable() {
            self.handle_readable(handler);
        }
        if ready.is_writable() {
            self.handle_writable(handler);
        }
        if ready.is_read_closed() {
            if let HandlerKind::Stream { .. } = handler.kind {
                debug!(token = handler.token, "stream hup");
                self.destroy(handler.token);
            }
        }
    }
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
