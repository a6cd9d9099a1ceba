// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator's node roster and task scheduling.
//!
//! Node servers connect over TCP and stay until they disconnect. A new
//! task goes to the node with the fewest tasks (earliest-connected
//! wins ties); assignment is the only round trip, correlated by task
//! id through the node's iowait table. Reclaim and control are
//! fire-and-forget.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use huddle_core::id::IdAlloc;
use huddle_core::limits::{TASK_PRIORITY_MAX, WAIT_RES_DEADLINE};
use huddle_core::{Error, NodeId, Result, TaskId};
use huddle_ioasync::{IoAsync, IoHandler, IoWait, Packet};
use huddle_wire::{
    CenterMsg, FrameDecoder, FrameHeader, NodeMsg, TaskAssignHead, TaskAssignResponse,
    TaskControlHead, TaskReclaim,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::task::TaskRegistry;

/// A relay task as the coordinator sees it.
#[derive(Debug)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub kind: u8,
    pub priority: u8,
    pub node: Arc<NodeRecord>,
    /// Where participants send relay traffic, as returned by the node.
    pub relay_addr: SocketAddr,
}

struct NodeLoad {
    task_count: usize,
    priority: i32,
    tasks: Vec<TaskId>,
}

/// One connected node server.
pub struct NodeRecord {
    pub id: NodeId,
    io: IoAsync,
    handler: OnceLock<Arc<IoHandler>>,
    decoder: Mutex<FrameDecoder>,
    waits: IoWait,
    nextseq: Mutex<u16>,
    load: Mutex<NodeLoad>,
}

impl NodeRecord {
    pub fn task_count(&self) -> usize {
        self.load.lock().task_count
    }

    /// Task handles this node currently hosts.
    pub fn hosted_tasks(&self) -> Vec<TaskId> {
        self.load.lock().tasks.clone()
    }

    fn register_task(&self, task_id: TaskId, priority: u8) {
        let mut load = self.load.lock();
        load.task_count += 1;
        load.priority += i32::from(priority);
        load.tasks.push(task_id);
    }

    fn unregister_task(&self, task_id: TaskId, priority: u8) {
        let mut load = self.load.lock();
        load.task_count = load.task_count.saturating_sub(1);
        load.priority -= i32::from(priority);
        load.tasks.retain(|t| *t != task_id);
    }

    fn on_data(&self, data: &[u8]) {
        self.decoder.lock().feed(data);
        loop {
            let frame = match self.decoder.lock().next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(node = %self.id, error = %e, "node stream poisoned, closing");
                    if let Some(handler) = self.handler.get() {
                        handler.close();
                    }
                    return;
                }
            };
            let Some((head, payload)) = frame else {
                return;
            };
            match NodeMsg::from_code(head.msg_type) {
                Some(NodeMsg::TaskAssignResponse) => {
                    let mut src = payload.clone();
                    match TaskAssignResponse::decode(&mut src) {
                        Ok(resp) => {
                            debug!(node = %self.id, task = %resp.task_id, addr = %resp.relay_addr,
                                "assign response");
                            if self
                                .waits
                                .post(head.msg_type, resp.task_id.raw(), payload)
                                .is_err()
                            {
                                warn!(node = %self.id, task = %resp.task_id,
                                    "late assign response dropped");
                            }
                        }
                        Err(e) => warn!(node = %self.id, error = %e, "bad assign response"),
                    }
                }
                None => warn!(node = %self.id, msg_type = head.msg_type, "unknown node frame"),
            }
        }
    }

    fn pkt_send(&self, msg_type: u8, payload: &[u8]) -> Result<()> {
        let handler = self.handler.get().ok_or(Error::NotFound("node handler"))?;
        let seq = {
            let mut seq = self.nextseq.lock();
            let out = *seq;
            *seq = seq.wrapping_add(1);
            out
        };
        let mut pkb = self.io.alloc()?;
        let buf = pkb.buf_mut();
        FrameHeader::new(msg_type, seq, payload.len() as u32).encode(buf);
        buf.extend_from_slice(payload);
        handler.send(pkb.freeze());
        Ok(())
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let load = self.load.lock();
        f.debug_struct("NodeRecord")
            .field("id", &self.id)
            .field("tasks", &load.task_count)
            .field("priority", &load.priority)
            .finish()
    }
}

/// The roster plus the listener that grows it.
#[derive(Clone)]
pub struct NodeMgr {
    inner: Arc<NodeMgrInner>,
}

struct NodeMgrInner {
    io: IoAsync,
    registry: Arc<TaskRegistry>,
    acceptor: OnceLock<Arc<IoHandler>>,
    local_addr: OnceLock<SocketAddr>,
    nodes: Mutex<Vec<Arc<NodeRecord>>>,
    node_ids: Mutex<IdAlloc>,
    task_ids: Mutex<IdAlloc>,
}

impl NodeMgr {
    /// Bind the node login port and start accepting node servers.
    pub async fn listen(io: IoAsync, registry: Arc<TaskRegistry>, bind: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "node manager listening");

        let inner = Arc::new(NodeMgrInner {
            io,
            registry,
            acceptor: OnceLock::new(),
            local_addr: OnceLock::new(),
            nodes: Mutex::new(Vec::new()),
            node_ids: Mutex::new(IdAlloc::new()),
            task_ids: Mutex::new(IdAlloc::new()),
        });
        let _ = inner.local_addr.set(local_addr);

        let on_accept = {
            let inner = Arc::downgrade(&inner);
            move |stream, peer| {
                if let Some(inner) = inner.upgrade() {
                    inner.accept_node(stream, peer);
                }
            }
        };
        let acceptor = inner.io.acceptor(listener, on_accept, || {});
        let _ = inner.acceptor.set(acceptor);

        Ok(Self { inner })
    }

    /// Actual bound address (useful when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.inner
            .local_addr
            .get()
            .copied()
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.lock().len()
    }

    /// Per-node task counts in connection order (tests and status).
    pub fn node_loads(&self) -> Vec<(NodeId, usize)> {
        self.inner
            .nodes
            .lock()
            .iter()
            .map(|n| (n.id, n.task_count()))
            .collect()
    }

    /// Assign a new task of `kind` to the least-loaded node and wait
    /// for the relay address it opens.
    pub async fn assign(&self, kind: u8, priority: u8, info: &(dyn Any + Send + Sync)) -> Result<Arc<TaskHandle>> {
        if priority > TASK_PRIORITY_MAX {
            return Err(Error::InvalidInput("task priority beyond ceiling"));
        }
        let node = self.choose_node().ok_or(Error::Exhausted("no node server connected"))?;
        let proto = self
            .inner
            .registry
            .find(kind)
            .ok_or(Error::NotFound("task kind not registered"))?;
        let task_id = TaskId::new(self.inner.task_ids.lock().next());

        node.register_task(task_id, priority);

        let mut body = Vec::new();
        TaskAssignHead { task_id, kind, priority }.encode(&mut body);
        if let Err(e) = proto.init_assign_pkt(info, &mut body) {
            node.unregister_task(task_id, priority);
            return Err(e);
        }

        let watcher = node.waits.register(NodeMsg::TaskAssignResponse.code(), task_id.raw(), 256);
        if let Err(e) = node.pkt_send(CenterMsg::TaskAssign.code(), &body) {
            node.unregister_task(task_id, priority);
            return Err(e);
        }

        let data = match node.waits.wait(watcher, WAIT_RES_DEADLINE).await {
            Ok(data) => data,
            Err(e) => {
                warn!(task = %task_id, node = %node.id, "assign response missed");
                node.unregister_task(task_id, priority);
                return Err(e);
            }
        };
        let resp = TaskAssignResponse::decode(&mut data.clone())?;
        info!(task = %task_id, node = %node.id, relay = %resp.relay_addr, "task assigned");
        Ok(Arc::new(TaskHandle {
            task_id,
            kind,
            priority,
            node: Arc::clone(&node),
            relay_addr: resp.relay_addr,
        }))
    }

    /// Tear a task down on its node.
    pub fn reclaim(&self, task: &TaskHandle) -> Result<()> {
        let proto = self
            .inner
            .registry
            .find(task.kind)
            .ok_or(Error::NotFound("task kind not registered"))?;
        task.node.unregister_task(task.task_id, task.priority);

        let mut body = Vec::new();
        TaskReclaim { task_id: task.task_id, kind: task.kind }.encode(&mut body);
        proto.init_reclaim_pkt(&mut body)?;
        task.node.pkt_send(CenterMsg::TaskReclaim.code(), &body)
    }

    /// Send a kind-specific control operation to a task's node.
    pub fn control(&self, task: &TaskHandle, opt: u8, info: &(dyn Any + Send + Sync)) -> Result<()> {
        let proto = self
            .inner
            .registry
            .find(task.kind)
            .ok_or(Error::NotFound("task kind not registered"))?;
        let mut body = Vec::new();
        TaskControlHead { task_id: task.task_id, kind: task.kind, opt }.encode(&mut body);
        proto.init_control_pkt(info, &mut body)?;
        task.node.pkt_send(CenterMsg::TaskControl.code(), &body)
    }

    /// Smallest task count wins; the earliest-connected node breaks
    /// ties. Priority admissibility is tracked but rejects nobody.
    fn choose_node(&self) -> Option<Arc<NodeRecord>> {
        let nodes = self.inner.nodes.lock();
        let mut best: Option<&Arc<NodeRecord>> = None;
        for node in nodes.iter() {
            let better = match best {
                None => true,
                Some(b) => node.task_count() < b.task_count(),
            };
            if better {
                best = Some(node);
            }
        }
        best.cloned()
    }

    pub fn shutdown(&self) {
        if let Some(acceptor) = self.inner.acceptor.get() {
            acceptor.close();
        }
        for node in self.inner.nodes.lock().drain(..) {
            if let Some(handler) = node.handler.get() {
                handler.close();
            }
        }
    }
}

impl std::fmt::Debug for NodeMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMgr").field("nodes", &self.node_count()).finish()
    }
}

impl NodeMgrInner {
    fn accept_node(self: &Arc<Self>, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = NodeId::new(self.node_ids.lock().next());
        info!(node = %id, %peer, "node server registered");

        let node = Arc::new(NodeRecord {
            id,
            io: self.io.clone(),
            handler: OnceLock::new(),
            decoder: Mutex::new(FrameDecoder::new()),
            waits: IoWait::new(),
            nextseq: Mutex::new(0),
            load: Mutex::new(NodeLoad { task_count: 0, priority: 0, tasks: Vec::new() }),
        });

        let on_data = {
            let node = Arc::downgrade(&node);
            move |pkt: Packet| {
                if let Some(node) = node.upgrade() {
                    node.on_data(&pkt);
                }
            }
        };
        let on_close = {
            let mgr = Arc::downgrade(self);
            move || {
                if let Some(mgr) = mgr.upgrade() {
                    mgr.unregister_node(id);
                }
            }
        };
        let handler = self.io.stream(stream, on_data, on_close);
        let _ = node.handler.set(handler);
        self.nodes.lock().push(node);
    }

    fn unregister_node(&self, id: NodeId) {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|n| n.id != id);
        if nodes.len() < before {
            info!(node = %id, "node server unregistered");
        }
    }
}

#[cfg(test)]
#[path = "nodes_tests.rs"]
mod tests;
