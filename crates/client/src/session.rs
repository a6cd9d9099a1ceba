// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client session: control-plane calls that block on their
//! correlated response, and the relay paths for commands and state
//! images.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use huddle_core::limits::{
    CLI_FRAGMENT_MAX_LEN, DEFRAG_TIMEOUT, HEARTBEAT_PERIOD, LIST_RESULT_MAX_LEN,
    PACKET_MAX_PAYLOAD, TASK_TURN, WAIT_RES_DEADLINE,
};
use huddle_core::{Error, GroupId, Result, UserId};
use huddle_ioasync::{
    Assembler, FragVec, IoAsync, IoHandler, IoWait, Packet, PacketPool, Splitter, TimerHandle,
    TimerService,
};
use huddle_wire::{
    split_datagram, ClientPack, CliMsg, CoordMsg, ErrCode, FrameHeader, GroupDesc, GroupFlags,
    GroupName, GroupOp, GroupResult, HandleErr, JoinGroup, ListGroup, NewGroup, PackKind,
    RelayMsg, TaskReq, UserRef,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::state::SessionState;

/// What a session surfaces to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A peer checked in to the group's relay.
    Checkin,
    /// A command payload from a peer.
    Command(Bytes),
    /// A fully reassembled state image from a peer.
    StateImage(Bytes),
    /// The group was deleted; relay state has been cleared.
    GroupDelete,
    /// The coordinator rejected a request. The pending call still
    /// times out on its own; this is the early explanation.
    Rejected(ErrCode),
}

type EventFn = Box<dyn Fn(ClientEvent) + Send + Sync>;

/// A connected client session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    io: IoAsync,
    timers: TimerService,
    waits: IoWait,
    coord_addr: SocketAddr,
    control: OnceLock<Arc<IoHandler>>,
    relay: OnceLock<Arc<IoHandler>>,
    session: Mutex<SessionState>,
    control_seq: Mutex<u16>,
    relay_seq: Mutex<u16>,
    response_timeout: Mutex<Duration>,
    splitter: Splitter,
    assembler: OnceLock<Assembler>,
    hbeat: Mutex<Option<TimerHandle>>,
    events: EventFn,
}

impl Client {
    /// Bind both sockets and start the session's reactor.
    pub async fn connect(
        coordinator: SocketAddr,
        events: impl Fn(ClientEvent) + Send + Sync + 'static,
    ) -> Result<Self> {
        let io = IoAsync::start(PacketPool::new(PACKET_MAX_PAYLOAD, 16));
        let timers = TimerService::start();

        let inner = Arc::new(ClientInner {
            io,
            timers: timers.clone(),
            waits: IoWait::new(),
            coord_addr: coordinator,
            control: OnceLock::new(),
            relay: OnceLock::new(),
            session: Mutex::new(SessionState::default()),
            control_seq: Mutex::new(0),
            relay_seq: Mutex::new(0),
            response_timeout: Mutex::new(WAIT_RES_DEADLINE),
            splitter: Splitter::new(CLI_FRAGMENT_MAX_LEN),
            assembler: OnceLock::new(),
            hbeat: Mutex::new(None),
            events: Box::new(events),
        });

        let assembler = {
            let inner = Arc::downgrade(&inner);
            Assembler::new(timers, DEFRAG_TIMEOUT, move |payload| {
                if let Some(inner) = inner.upgrade() {
                    inner.emit(ClientEvent::StateImage(payload));
                }
            })
        };
        let _ = inner.assembler.set(assembler);

        let control_socket = UdpSocket::bind("0.0.0.0:0").await?;
        let on_control = {
            let inner = Arc::downgrade(&inner);
            move |pkt: Packet, _from: SocketAddr| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_control_packet(&pkt);
                }
            }
        };
        let control = inner.io.datagram(control_socket, on_control, || {});
        let _ = inner.control.set(control);

        let relay_socket = UdpSocket::bind("0.0.0.0:0").await?;
        let on_relay = {
            let inner = Arc::downgrade(&inner);
            move |pkt: Packet, _from: SocketAddr| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_relay_packet(&pkt);
                }
            }
        };
        let relay = inner.io.datagram(relay_socket, on_relay, || {});
        let _ = inner.relay.set(relay);

        Ok(Self { inner })
    }

    /// Responses slower than this fail the pending call with `Timeout`.
    pub fn set_response_timeout(&self, timeout: Duration) {
        *self.inner.response_timeout.lock() = timeout;
    }

    /// Log in to the coordinator; the allocated user id is kept on the
    /// session and heartbeats start flowing.
    pub async fn login(&self) -> Result<UserId> {
        let watcher = self.inner.waits.register(CoordMsg::LoginResponse.code(), 0, 8);
        self.inner.control_send(CliMsg::Login, &[])?;
        let data = self.inner.wait(watcher).await?;
        let user_id = UserRef::decode(&mut data.clone())?.user_id;
        self.inner.session.lock().user_id = Some(user_id);
        ClientInner::schedule_hbeat(&self.inner);
        info!(user = %user_id, "logged in");
        Ok(user_id)
    }

    /// Log out and stop heartbeats. Fire-and-forget on the wire.
    pub fn logout(&self) -> Result<()> {
        let user_id = self.inner.user_id()?;
        let mut body = Vec::new();
        UserRef { user_id }.encode(&mut body);
        self.inner.control_send(CliMsg::Logout, &body)?;
        self.inner.stop_hbeat();
        *self.inner.session.lock() = SessionState::default();
        info!(user = %user_id, "logged out");
        Ok(())
    }

    /// Create a group and adopt its relay as this session's target.
    pub async fn create_group(
        &self,
        open: bool,
        name: &str,
        passwd: Option<&str>,
    ) -> Result<GroupResult> {
        let user_id = self.inner.user_id()?;
        let mut flags = GroupFlags::default();
        if open {
            flags.insert(GroupFlags::OPENED);
        }
        let mut req = NewGroup {
            user_id,
            flags,
            name: GroupName::new(name),
            passwd: GroupName::empty(),
        };
        if let Some(passwd) = passwd {
            req.flags.insert(GroupFlags::NEED_PASSWD);
            req.passwd = GroupName::new(passwd);
        }
        let mut body = Vec::new();
        req.encode(&mut body);

        let watcher =
            self.inner.waits.register(CoordMsg::CreateGroupResponse.code(), 0, 64);
        self.inner.control_send(CliMsg::CreateGroup, &body)?;
        let data = self.inner.wait(watcher).await?;
        let result = GroupResult::decode(&mut data.clone())?;
        self.inner.adopt_group(&result);
        info!(group = %result.group_id, task = %result.task_id, "group created");
        Ok(result)
    }

    /// Page through the group directory.
    pub async fn list_groups(&self, pos: u32, count: u32) -> Result<Vec<GroupDesc>> {
        let user_id = self.inner.user_id()?;
        let mut body = Vec::new();
        ListGroup { user_id, pos, count }.encode(&mut body);

        let watcher = self.inner.waits.register(
            CoordMsg::ListGroupResponse.code(),
            0,
            LIST_RESULT_MAX_LEN,
        );
        self.inner.control_send(CliMsg::ListGroup, &body)?;
        let data = self.inner.wait(watcher).await?;
        GroupDesc::decode_list(data)
    }

    /// Join a group and adopt its relay.
    pub async fn join_group(&self, group_id: GroupId, passwd: Option<&str>) -> Result<GroupResult> {
        let user_id = self.inner.user_id()?;
        let mut body = Vec::new();
        JoinGroup {
            user_id,
            group_id,
            passwd: passwd.map(GroupName::new).unwrap_or_else(GroupName::empty),
        }
        .encode(&mut body);

        let watcher = self.inner.waits.register(CoordMsg::JoinGroupResponse.code(), 0, 64);
        self.inner.control_send(CliMsg::JoinGroup, &body)?;
        let data = self.inner.wait(watcher).await?;
        let result = GroupResult::decode(&mut data.clone())?;
        self.inner.adopt_group(&result);
        info!(group = %result.group_id, "joined group");
        Ok(result)
    }

    /// Leave the current group. Fire-and-forget.
    pub fn leave_group(&self) -> Result<()> {
        let (user_id, group_id) = self.inner.membership()?;
        let mut body = Vec::new();
        GroupOp { user_id, group_id }.encode(&mut body);
        self.inner.control_send(CliMsg::LeaveGroup, &body)?;
        self.inner.clear_group();
        info!(group = %group_id, "left group");
        Ok(())
    }

    /// Delete the current group; members are notified by the
    /// coordinator.
    pub fn delete_group(&self) -> Result<()> {
        let (user_id, group_id) = self.inner.membership()?;
        let mut body = Vec::new();
        GroupOp { user_id, group_id }.encode(&mut body);
        self.inner.control_send(CliMsg::DeleteGroup, &body)?;
        self.inner.clear_group();
        info!(group = %group_id, "deleted group");
        Ok(())
    }

    /// Announce this session to the relay so it learns our endpoint.
    pub fn checkin(&self) -> Result<()> {
        self.inner.relay_send(ClientPack::checkin())
    }

    /// Send a short command to every running peer.
    pub fn send_command(&self, data: &[u8]) -> Result<()> {
        self.inner
            .relay_send(ClientPack::command(Bytes::copy_from_slice(data))?)
    }

    /// Fragment a state image and send every piece through the relay.
    pub fn send_state_img(&self, data: &[u8]) -> Result<()> {
        let frags = self.inner.splitter.split(Bytes::copy_from_slice(data))?;
        debug!(len = data.len(), frags = frags.len(), "state image out");
        for frag in frags {
            self.inner.relay_send(ClientPack::fragment(
                frag.seq,
                frag.ofs,
                frag.mf,
                frag.data,
            )?)?;
        }
        Ok(())
    }

    /// Snapshot for a handoff.
    pub fn session_state(&self) -> SessionState {
        self.inner.session.lock().clone()
    }

    /// Persist the snapshot.
    pub fn save_state(&self, path: &Path) -> Result<()> {
        self.session_state().save(path)
    }

    /// Resume from a snapshot: relaying works again immediately; the
    /// heartbeat restarts so the coordinator keeps us alive.
    pub fn restore_state(&self, state: SessionState) {
        *self.inner.session.lock() = state;
        if self.inner.session.lock().user_id.is_some() {
            ClientInner::schedule_hbeat(&self.inner);
        }
    }

    /// Reassembly timeouts observed so far.
    pub fn defrag_timeouts(&self) -> usize {
        self.inner.assembler.get().map(|a| a.timeouts()).unwrap_or(0)
    }

    /// Tear the session down without logging out.
    pub fn shutdown(&self) {
        self.inner.stop_hbeat();
        self.inner.timers.shutdown();
        self.inner.io.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("session", &self.inner.session.lock()).finish()
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        (self.events)(event);
    }

    fn user_id(&self) -> Result<UserId> {
        self.session.lock().user_id.ok_or(Error::NotFound("not logged in"))
    }

    fn membership(&self) -> Result<(UserId, GroupId)> {
        let session = self.session.lock();
        match (session.user_id, session.group_id) {
            (Some(user), Some(group)) => Ok((user, group)),
            (None, _) => Err(Error::NotFound("not logged in")),
            (_, None) => Err(Error::NotFound("not in a group")),
        }
    }

    fn adopt_group(&self, result: &GroupResult) {
        let mut session = self.session.lock();
        session.group_id = Some(result.group_id);
        session.task_id = Some(result.task_id);
        session.relay_addr = Some(result.relay_addr);
    }

    fn clear_group(&self) {
        let mut session = self.session.lock();
        session.group_id = None;
        session.task_id = None;
        session.relay_addr = None;
    }

    async fn wait(&self, watcher: huddle_ioasync::Watcher) -> Result<Bytes> {
        let timeout = *self.response_timeout.lock();
        self.waits.wait(watcher, timeout).await
    }

    /// Frame and queue a control message to the coordinator.
    fn control_send(&self, msg: CliMsg, payload: &[u8]) -> Result<()> {
        let handler = self.control.get().ok_or(Error::NotFound("control socket"))?;
        let seq = next_seq(&self.control_seq);
        let mut pkb = self.io.alloc()?;
        let buf = pkb.buf_mut();
        FrameHeader::new(msg.code(), seq, payload.len() as u32).encode(buf);
        buf.extend_from_slice(payload);
        handler.sendto(pkb.freeze(), self.coord_addr);
        Ok(())
    }

    /// Wrap an inner pack in the task-req envelope and queue it to the
    /// relay.
    fn relay_send(&self, pack: ClientPack) -> Result<()> {
        let (user_id, task_id, relay_addr) = {
            let session = self.session.lock();
            match (session.user_id, session.task_id, session.relay_addr) {
                (Some(u), Some(t), Some(a)) => (u, t, a),
                _ => return Err(Error::NotFound("no relay assigned")),
            }
        };
        let handler = self.relay.get().ok_or(Error::NotFound("relay socket"))?;
        let seq = next_seq(&self.relay_seq);

        let datalen = pack.encoded_len() as u32;
        let mut pkb = self.io.alloc()?;
        let buf = pkb.buf_mut();
        FrameHeader::new(
            RelayMsg::TaskReq.code(),
            seq,
            huddle_wire::TASK_REQ_HEAD_LEN as u32 + datalen,
        )
        .encode(buf);
        TaskReq { task_id, user_id, kind: TASK_TURN, datalen }.encode(buf);
        pack.encode(buf);
        handler.sendto(pkb.freeze(), relay_addr);
        Ok(())
    }

    fn on_control_packet(&self, pkt: &Packet) {
        let data = Bytes::copy_from_slice(pkt);
        let (head, payload) = match split_datagram(data) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(error = %e, "control datagram dropped");
                return;
            }
        };
        match CoordMsg::from_code(head.msg_type) {
            Some(
                CoordMsg::LoginResponse
                | CoordMsg::CreateGroupResponse
                | CoordMsg::ListGroupResponse
                | CoordMsg::JoinGroupResponse,
            ) => {
                // Success responses correlate by type; late ones are
                // discarded silently.
                let _ = self.waits.post(head.msg_type, 0, payload);
            }
            Some(CoordMsg::GroupDelete) => {
                info!("group deleted by peer");
                self.clear_group();
                self.emit(ClientEvent::GroupDelete);
            }
            Some(CoordMsg::HandleErr) => match HandleErr::decode(&mut payload.clone()) {
                Ok(err) => {
                    warn!(code = ?err.code, seq = head.seq, "request rejected");
                    self.emit(ClientEvent::Rejected(err.code));
                }
                Err(e) => debug!(error = %e, "bad handle-err payload"),
            },
            Some(CoordMsg::Ack) | None => {}
        }
    }

    fn on_relay_packet(&self, pkt: &Packet) {
        let data = Bytes::copy_from_slice(pkt);
        let (head, payload) = match split_datagram(data) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(error = %e, "relay datagram dropped");
                return;
            }
        };
        if RelayMsg::from_code(head.msg_type) != Some(RelayMsg::TurnPack) {
            return;
        }
        let pack = match ClientPack::decode(payload) {
            Ok(pack) => pack,
            Err(e) => {
                debug!(error = %e, "bad turn pack dropped");
                return;
            }
        };
        match pack.kind {
            PackKind::Checkin => self.emit(ClientEvent::Checkin),
            PackKind::Command => self.emit(ClientEvent::Command(pack.data)),
            PackKind::StateImg => {
                let Some(assembler) = self.assembler.get() else {
                    return;
                };
                let frag =
                    FragVec { seq: pack.seq, ofs: pack.ofs, mf: pack.mf, data: pack.data };
                if let Err(e) = assembler.insert(frag) {
                    debug!(error = %e, "fragment dropped");
                }
            }
        }
    }

    /// Re-arming heartbeat: sends while a user id is on the session.
    fn schedule_hbeat(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        let handle = inner.timers.add_after(HEARTBEAT_PERIOD, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let user_id = { inner.session.lock().user_id };
            if let Some(user_id) = user_id {
                let mut body = Vec::new();
                UserRef { user_id }.encode(&mut body);
                if let Err(e) = inner.control_send(CliMsg::Heartbeat, &body) {
                    warn!(error = %e, "heartbeat send failed");
                }
                Self::schedule_hbeat(&inner);
            }
        });
        *inner.hbeat.lock() = Some(handle);
    }

    fn stop_hbeat(&self) {
        if let Some(handle) = self.hbeat.lock().take() {
            self.timers.remove(handle);
        }
    }
}

fn next_seq(seq: &Mutex<u16>) -> u16 {
    let mut seq = seq.lock();
    let out = *seq;
    *seq = seq.wrapping_add(1);
    out
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
