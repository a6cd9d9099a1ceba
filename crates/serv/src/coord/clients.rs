// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-facing control plane: users, groups, and the lifecycle
//! of their relay tasks.
//!
//! Requests arrive as datagrams on the client login port; each is
//! dispatched onto its own task so slow paths (task assignment waits
//! on the chosen node) never stall the reactor. Every rejected request
//! is answered with a HANDLE_ERR carrying a numeric reason and echoing
//! the request's sequence number; the requester's own timeout remains
//! the recovery path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use huddle_core::id::IdAlloc;
use huddle_core::limits::{GROUP_MAX_USER, LIST_RESULT_MAX_LEN, TASK_PRIORITY_NORMAL, TASK_TURN};
use huddle_core::{Error, GroupId, Result, UserId};
use huddle_ioasync::{Heartbeats, IoAsync, IoHandler, Packet, TimerService};
use huddle_wire::{
    split_datagram, CliMsg, ControlOp, CoordMsg, ErrCode, FrameHeader, GroupDesc, GroupFlags,
    GroupName, GroupOp, GroupRef, GroupResult, HandleErr, JoinGroup, ListGroup, NewGroup,
    TurnAssign, TurnControl, UserRef,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::coord::nodes::{NodeMgr, TaskHandle};

/// One logged-in client.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    /// Source address of the login datagram; responses and pushes go
    /// here. The relay never trusts it, it learns endpoints itself.
    pub addr: SocketAddr,
    pub group: Option<GroupId>,
}

/// One live group and the relay task that serves it.
pub struct GroupRecord {
    pub group_id: GroupId,
    pub name: GroupName,
    passwd: GroupName,
    pub flags: GroupFlags,
    pub users: Vec<UserId>,
    pub task: Arc<TaskHandle>,
}

/// The user/group tables plus the datagram endpoint that mutates them.
#[derive(Clone)]
pub struct ClientMgr {
    inner: Arc<ClientMgrInner>,
}

struct ClientMgrInner {
    io: IoAsync,
    nodes: NodeMgr,
    handler: OnceLock<Arc<IoHandler>>,
    local_addr: OnceLock<SocketAddr>,
    users: Mutex<HashMap<u32, UserRecord>>,
    groups: Mutex<HashMap<u32, GroupRecord>>,
    uid_alloc: Mutex<IdAlloc>,
    gid_alloc: Mutex<IdAlloc>,
    nextseq: Mutex<u16>,
    hbeat: OnceLock<Heartbeats>,
}

impl ClientMgr {
    /// Bind the client login port and start serving.
    pub async fn listen(
        io: IoAsync,
        timers: TimerService,
        nodes: NodeMgr,
        bind: SocketAddr,
        hbeat_period: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "client manager listening");

        let inner = Arc::new(ClientMgrInner {
            io,
            nodes,
            handler: OnceLock::new(),
            local_addr: OnceLock::new(),
            users: Mutex::new(HashMap::with_capacity(256)),
            groups: Mutex::new(HashMap::with_capacity(256)),
            uid_alloc: Mutex::new(IdAlloc::new()),
            gid_alloc: Mutex::new(IdAlloc::new()),
            nextseq: Mutex::new(0),
            hbeat: OnceLock::new(),
        });
        let _ = inner.local_addr.set(local_addr);

        // Heartbeat expiry is an implicit logout.
        let hbeat = {
            let inner = Arc::downgrade(&inner);
            Heartbeats::start_with_period(timers, hbeat_period, move |uid| {
                if let Some(inner) = inner.upgrade() {
                    info!(user = uid, "heartbeat expired, dropping user");
                    inner.drop_user(UserId::new(uid));
                }
            })
        };
        let _ = inner.hbeat.set(hbeat);

        let on_packet = {
            let inner = Arc::downgrade(&inner);
            move |pkt: Packet, from: SocketAddr| {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let data = Bytes::copy_from_slice(&pkt);
                tokio::spawn(async move { inner.dispatch(data, from).await });
            }
        };
        let handler = inner.io.datagram(socket, on_packet, || {});
        let _ = inner.handler.set(handler);

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner
            .local_addr
            .get()
            .copied()
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    pub fn user_count(&self) -> usize {
        self.inner.users.lock().len()
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.lock().len()
    }

    /// Members of a group, if it exists (tests and status).
    pub fn group_members(&self, group_id: GroupId) -> Option<Vec<UserId>> {
        self.inner.groups.lock().get(&group_id.raw()).map(|g| g.users.clone())
    }

    pub fn shutdown(&self) {
        if let Some(hbeat) = self.inner.hbeat.get() {
            hbeat.stop();
        }
        if let Some(handler) = self.inner.handler.get() {
            handler.close();
        }
    }
}

impl std::fmt::Debug for ClientMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMgr")
            .field("users", &self.user_count())
            .field("groups", &self.group_count())
            .finish()
    }
}

impl ClientMgrInner {
    async fn dispatch(self: Arc<Self>, data: Bytes, from: SocketAddr) {
        let (head, payload) = match split_datagram(data) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(%from, error = %e, "client datagram dropped");
                return;
            }
        };
        if let Err(e) = self.handle(head, payload, from).await {
            warn!(%from, msg_type = head.msg_type, error = %e, "request failed");
        }
    }

    async fn handle(&self, head: FrameHeader, payload: Bytes, from: SocketAddr) -> Result<()> {
        let mut src = payload;
        match CliMsg::from_code(head.msg_type) {
            Some(CliMsg::Ack) => Ok(()),
            Some(CliMsg::Login) => self.login(from),
            Some(CliMsg::Logout) => {
                let req = UserRef::decode(&mut src)?;
                self.logout(req.user_id)
            }
            Some(CliMsg::Heartbeat) => {
                let req = UserRef::decode(&mut src)?;
                self.heartbeat(req.user_id)
            }
            Some(CliMsg::CreateGroup) => {
                let req = NewGroup::decode(&mut src)?;
                self.create_group(req, head.seq, from).await
            }
            Some(CliMsg::DeleteGroup) => {
                let req = GroupOp::decode(&mut src)?;
                self.delete_group(req, head.seq, from)
            }
            Some(CliMsg::ListGroup) => {
                let req = ListGroup::decode(&mut src)?;
                self.list_groups(req, head.seq, from)
            }
            Some(CliMsg::JoinGroup) => {
                let req = JoinGroup::decode(&mut src)?;
                self.join_group(req, head.seq, from)
            }
            Some(CliMsg::LeaveGroup) => {
                let req = GroupOp::decode(&mut src)?;
                self.leave_group(req.user_id, req.group_id)
            }
            None => {
                warn!(msg_type = head.msg_type, "unknown client message");
                Ok(())
            }
        }
    }

    fn login(&self, from: SocketAddr) -> Result<()> {
        let user_id = UserId::new(self.uid_alloc.lock().next());
        self.users
            .lock()
            .insert(user_id.raw(), UserRecord { user_id, addr: from, group: None });
        if let Some(hbeat) = self.hbeat.get() {
            hbeat.add(user_id.raw());
        }
        info!(user = %user_id, %from, "user login");

        let mut body = Vec::new();
        UserRef { user_id }.encode(&mut body);
        self.send(CoordMsg::LoginResponse, &body, from)
    }

    fn logout(&self, user_id: UserId) -> Result<()> {
        info!(user = %user_id, "user logout");
        self.drop_user(user_id);
        Ok(())
    }

    /// Remove a user entirely: roster, heartbeat, table. Explicit
    /// logout and heartbeat death share this path.
    fn drop_user(&self, user_id: UserId) {
        let user = self.users.lock().remove(&user_id.raw());
        let Some(user) = user else {
            return;
        };
        if let Some(hbeat) = self.hbeat.get() {
            hbeat.remove(user_id.raw());
        }
        if let Some(group_id) = user.group {
            if let Err(e) = self.leave_group(user_id, group_id) {
                debug!(user = %user_id, error = %e, "leave on drop failed");
            }
        }
    }

    fn heartbeat(&self, user_id: UserId) -> Result<()> {
        if !self.users.lock().contains_key(&user_id.raw()) {
            // Unknown id: drop silently.
            return Ok(());
        }
        if let Some(hbeat) = self.hbeat.get() {
            hbeat.beat(user_id.raw());
        }
        Ok(())
    }

    async fn create_group(&self, req: NewGroup, seq: u16, from: SocketAddr) -> Result<()> {
        let creator = match self.users.lock().get(&req.user_id.raw()).cloned() {
            Some(user) => user,
            None => return self.send_err(ErrCode::UnknownUser, seq, from),
        };
        // A user sits in at most one group; creating another leaves
        // the old one first.
        if let Some(prev) = creator.group {
            let _ = self.leave_group(req.user_id, prev);
        }

        let group_id = GroupId::new(self.gid_alloc.lock().next());
        let assign_info = TurnAssign {
            group_id,
            clients: vec![(creator.user_id, creator.addr)],
        };
        let task = match self
            .nodes
            .assign(TASK_TURN, TASK_PRIORITY_NORMAL, &assign_info)
            .await
        {
            Ok(task) => task,
            Err(Error::Exhausted(_)) => return self.send_err(ErrCode::NoNode, seq, from),
            Err(e) => {
                warn!(group = %group_id, error = %e, "turn task assign failed");
                return self.send_err(ErrCode::Internal, seq, from);
            }
        };

        // The creator may have dropped while we waited on the node.
        let attached = {
            let mut users = self.users.lock();
            match users.get_mut(&req.user_id.raw()) {
                Some(user) => {
                    user.group = Some(group_id);
                    true
                }
                None => false,
            }
        };
        if !attached {
            let _ = self.nodes.reclaim(&task);
            return self.send_err(ErrCode::UnknownUser, seq, from);
        }

        let result = GroupResult { group_id, task_id: task.task_id, relay_addr: task.relay_addr };
        info!(group = %group_id, task = %task.task_id, name = %req.name, "group created");
        self.groups.lock().insert(
            group_id.raw(),
            GroupRecord {
                group_id,
                name: req.name,
                passwd: if req.flags.contains(GroupFlags::NEED_PASSWD) {
                    req.passwd
                } else {
                    GroupName::empty()
                },
                flags: req.flags,
                users: vec![req.user_id],
                task,
            },
        );

        let mut body = Vec::new();
        result.encode(&mut body)?;
        self.send(CoordMsg::CreateGroupResponse, &body, from)
    }

    fn join_group(&self, req: JoinGroup, seq: u16, from: SocketAddr) -> Result<()> {
        let user = match self.users.lock().get(&req.user_id.raw()).cloned() {
            Some(user) => user,
            None => return self.send_err(ErrCode::UnknownUser, seq, from),
        };
        if let Some(prev) = user.group {
            let _ = self.leave_group(req.user_id, prev);
        }

        let joined = {
            let mut groups = self.groups.lock();
            match groups.get_mut(&req.group_id.raw()) {
                None => Err(ErrCode::UnknownGroup),
                Some(group)
                    if group.flags.contains(GroupFlags::NEED_PASSWD)
                        && group.passwd != req.passwd =>
                {
                    Err(ErrCode::BadPassphrase)
                }
                Some(group) if group.users.len() >= GROUP_MAX_USER => Err(ErrCode::GroupFull),
                Some(group) => {
                    group.users.push(req.user_id);
                    Ok((
                        Arc::clone(&group.task),
                        GroupResult {
                            group_id: group.group_id,
                            task_id: group.task.task_id,
                            relay_addr: group.task.relay_addr,
                        },
                    ))
                }
            }
        };
        let (task, result) = match joined {
            Ok(parts) => parts,
            Err(code) => return self.send_err(code, seq, from),
        };

        if let Some(user) = self.users.lock().get_mut(&req.user_id.raw()) {
            user.group = Some(req.group_id);
        }

        let control = TurnControl { user_id: req.user_id, addr: user.addr };
        if let Err(e) = self.nodes.control(&task, ControlOp::Join as u8, &control) {
            warn!(group = %req.group_id, error = %e, "turn join control failed");
        }
        info!(group = %req.group_id, user = %req.user_id, "user joined group");

        let mut body = Vec::new();
        result.encode(&mut body)?;
        self.send(CoordMsg::JoinGroupResponse, &body, from)
    }

    fn leave_group(&self, user_id: UserId, group_id: GroupId) -> Result<()> {
        let user = self
            .users
            .lock()
            .get(&user_id.raw())
            .cloned();

        let task = {
            let mut groups = self.groups.lock();
            let group = groups
                .get_mut(&group_id.raw())
                .ok_or(Error::NotFound("group to leave"))?;
            group.users.retain(|u| *u != user_id);
            Arc::clone(&group.task)
        };
        if let Some(user) = self.users.lock().get_mut(&user_id.raw()) {
            user.group = None;
        }

        let addr = user
            .map(|u| u.addr)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let control = TurnControl { user_id, addr };
        if let Err(e) = self.nodes.control(&task, ControlOp::Leave as u8, &control) {
            warn!(group = %group_id, error = %e, "turn leave control failed");
        }
        info!(group = %group_id, user = %user_id, "user left group");
        Ok(())
    }

    fn delete_group(&self, req: GroupOp, seq: u16, from: SocketAddr) -> Result<()> {
        if !self.users.lock().contains_key(&req.user_id.raw()) {
            return self.send_err(ErrCode::UnknownUser, seq, from);
        }
        let group = self.groups.lock().remove(&req.group_id.raw());
        let Some(group) = group else {
            return self.send_err(ErrCode::UnknownGroup, seq, from);
        };

        // Every non-initiator member learns by push.
        let notify: Vec<SocketAddr> = {
            let mut users = self.users.lock();
            group
                .users
                .iter()
                .filter_map(|member| {
                    let user = users.get_mut(&member.raw())?;
                    user.group = None;
                    (*member != req.user_id).then_some(user.addr)
                })
                .collect()
        };
        let mut body = Vec::new();
        GroupRef { group_id: group.group_id }.encode(&mut body);
        for addr in notify {
            let _ = self.send(CoordMsg::GroupDelete, &body, addr);
        }

        if let Err(e) = self.nodes.reclaim(&group.task) {
            warn!(group = %group.group_id, error = %e, "turn task reclaim failed");
        }
        info!(group = %group.group_id, "group deleted");
        Ok(())
    }

    fn list_groups(&self, req: ListGroup, seq: u16, from: SocketAddr) -> Result<()> {
        if !self.users.lock().contains_key(&req.user_id.raw()) {
            return self.send_err(ErrCode::UnknownUser, seq, from);
        }

        let mut body = Vec::new();
        {
            let groups = self.groups.lock();
            let mut index = 0u32;
            let mut packed = 0u32;
            for group in groups.values() {
                if index < req.pos {
                    index += 1;
                    continue;
                }
                index += 1;
                if packed >= req.count {
                    break;
                }
                let desc = GroupDesc {
                    group_id: group.group_id,
                    flags: group.flags,
                    name: group.name.as_str().to_string(),
                };
                if body.len() + desc.encoded_len() >= LIST_RESULT_MAX_LEN {
                    break;
                }
                desc.encode(&mut body);
                packed += 1;
            }
        }
        debug!(user = %req.user_id, bytes = body.len(), "list groups");
        self.send(CoordMsg::ListGroupResponse, &body, from)
    }

    /// Frame and queue a response; the sequence is this manager's own
    /// counter (clients correlate success responses by type).
    fn send(&self, msg: CoordMsg, payload: &[u8], to: SocketAddr) -> Result<()> {
        let seq = {
            let mut seq = self.nextseq.lock();
            let out = *seq;
            *seq = seq.wrapping_add(1);
            out
        };
        self.send_framed(msg, seq, payload, to)
    }

    /// Reject a request: HANDLE_ERR echoes the request's sequence.
    fn send_err(&self, code: ErrCode, req_seq: u16, to: SocketAddr) -> Result<()> {
        debug!(?code, %to, "request rejected");
        let mut body = Vec::new();
        HandleErr { code }.encode(&mut body);
        self.send_framed(CoordMsg::HandleErr, req_seq, &body, to)
    }

    fn send_framed(&self, msg: CoordMsg, seq: u16, payload: &[u8], to: SocketAddr) -> Result<()> {
        let handler = self.handler.get().ok_or(Error::NotFound("client handler"))?;
        let mut pkb = self.io.alloc()?;
        let buf = pkb.buf_mut();
        FrameHeader::new(msg.code(), seq, payload.len() as u32).encode(buf);
        buf.extend_from_slice(payload);
        handler.sendto(pkb.freeze(), to);
        Ok(())
    }
}

#[cfg(test)]
#[path = "clients_tests.rs"]
mod tests;
