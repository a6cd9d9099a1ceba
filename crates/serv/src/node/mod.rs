// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The node server: hosts relay tasks at the coordinator's direction.
//!
//! One long-lived TCP stream carries control frames from the
//! coordinator; tasks themselves live on a pool of task workers, each
//! a reactor on its own system-assigned UDP socket. New tasks land on
//! the least-loaded worker with spare capacity, a fresh worker is
//! spawned when all are full, and a worker that loses its last task is
//! destroyed.

pub mod turn;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use huddle_core::limits::WORKER_MAX_TASK_COUNT;
use huddle_core::{Error, Result, TaskId};
use huddle_ioasync::{IoAsync, IoHandler, Packet, PacketPool};
use huddle_wire::{
    split_datagram, CenterMsg, FrameDecoder, FrameHeader, NodeMsg, RelayMsg, TaskAssignHead,
    TaskAssignResponse, TaskControlHead, TaskReclaim, TaskReq,
};
use parking_lot::Mutex;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::task::{Task, TaskRegistry};

/// A node server connected to its coordinator.
#[derive(Clone)]
pub struct NodeServer {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    io: IoAsync,
    pool: PacketPool,
    registry: Arc<TaskRegistry>,
    control: OnceLock<Arc<IoHandler>>,
    decoder: Mutex<FrameDecoder>,
    nextseq: Mutex<u16>,
    /// IP the coordinator can reach us on, advertised with each
    /// worker's relay port.
    advertise_ip: IpAddr,
    workers: Mutex<WorkerTable>,
}

#[derive(Default)]
struct WorkerTable {
    list: Vec<Arc<TaskWorker>>,
    /// Fast path: the worker that took the previous task.
    suit: Option<Arc<TaskWorker>>,
    by_task: HashMap<TaskId, Arc<TaskWorker>>,
    task_count: usize,
}

impl NodeServer {
    /// Connect to the coordinator's node port and start serving.
    pub async fn connect(
        io: IoAsync,
        coordinator: SocketAddr,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(coordinator).await?;
        let advertise_ip = stream.local_addr()?.ip();
        info!(%coordinator, %advertise_ip, "node server connected");

        let inner = Arc::new(NodeInner {
            pool: io.pool().clone(),
            io,
            registry,
            control: OnceLock::new(),
            decoder: Mutex::new(FrameDecoder::new()),
            nextseq: Mutex::new(0),
            advertise_ip,
            workers: Mutex::new(WorkerTable::default()),
        });

        let on_data = {
            let inner = Arc::downgrade(&inner);
            move |pkt: Packet| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_control_data(&pkt);
                }
            }
        };
        let handler = inner.io.stream(stream, on_data, || {
            warn!("coordinator control stream closed");
        });
        let _ = inner.control.set(handler);

        Ok(Self { inner })
    }

    /// Tasks hosted across all workers.
    pub fn task_count(&self) -> usize {
        self.inner.workers.lock().task_count
    }

    /// Live task workers.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().list.len()
    }

    pub fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers.list {
            worker.io.shutdown();
        }
        if let Some(handler) = self.inner.control.get() {
            handler.shutdown();
        }
    }
}

impl std::fmt::Debug for NodeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServer")
            .field("workers", &self.worker_count())
            .field("tasks", &self.task_count())
            .finish()
    }
}

impl NodeInner {
    fn on_control_data(self: &Arc<Self>, data: &[u8]) {
        self.decoder.lock().feed(data);
        loop {
            let frame = match self.decoder.lock().next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "control stream poisoned, closing");
                    if let Some(handler) = self.control.get() {
                        handler.close();
                    }
                    return;
                }
            };
            let Some((head, payload)) = frame else {
                return;
            };
            if let Err(e) = self.handle_control(head, payload) {
                warn!(msg_type = head.msg_type, error = %e, "control frame failed");
            }
        }
    }

    fn handle_control(self: &Arc<Self>, head: FrameHeader, payload: Bytes) -> Result<()> {
        match CenterMsg::from_code(head.msg_type) {
            Some(CenterMsg::TaskAssign) => {
                let mut src = payload;
                let assign = TaskAssignHead::decode(&mut src)?;
                let proto = self
                    .registry
                    .find(assign.kind)
                    .ok_or(Error::NotFound("task kind not registered"))?;
                let task = proto.assign_handle(&assign, src)?;

                let mut extra = Vec::new();
                task.init_assign_response_pkt(&mut extra)?;
                let worker = self.place_task(assign.task_id, task)?;

                let mut body = Vec::new();
                TaskAssignResponse {
                    task_id: assign.task_id,
                    kind: assign.kind,
                    relay_addr: worker.addr,
                }
                .encode(&mut body)?;
                body.extend_from_slice(&extra);
                self.pkt_send(NodeMsg::TaskAssignResponse.code(), &body)
            }
            Some(CenterMsg::TaskReclaim) => {
                let reclaim = TaskReclaim::decode(&mut payload.clone())?;
                self.reclaim_task(reclaim.task_id)
            }
            Some(CenterMsg::TaskControl) => {
                let mut src = payload;
                let control = TaskControlHead::decode(&mut src)?;
                let worker = self
                    .workers
                    .lock()
                    .by_task
                    .get(&control.task_id)
                    .cloned()
                    .ok_or(Error::NotFound("task for control"))?;
                let mut tasks = worker.tasks.lock();
                let task = tasks
                    .get_mut(&control.task_id)
                    .ok_or(Error::NotFound("task for control"))?;
                task.control_handle(&control, src)
            }
            None => Err(Error::InvalidInput("unknown control frame")),
        }
    }

    /// Put a new task on the least-loaded worker with spare capacity,
    /// spawning a fresh worker when every one is full.
    fn place_task(self: &Arc<Self>, task_id: TaskId, task: Box<dyn Task>) -> Result<Arc<TaskWorker>> {
        let worker = {
            let mut table = self.workers.lock();
            let candidate = match &table.suit {
                Some(w) if w.len() < WORKER_MAX_TASK_COUNT => Some(Arc::clone(w)),
                _ => table
                    .list
                    .iter()
                    .filter(|w| w.len() < WORKER_MAX_TASK_COUNT)
                    .min_by_key(|w| w.len())
                    .cloned(),
            };
            let worker = match candidate {
                Some(worker) => worker,
                None => {
                    let worker = self.create_worker()?;
                    table.list.push(Arc::clone(&worker));
                    info!(addr = %worker.addr, total = table.list.len(), "task worker spawned");
                    worker
                }
            };
            table.by_task.insert(task_id, Arc::clone(&worker));
            table.task_count += 1;
            table.suit = Some(Arc::clone(&worker));
            worker
        };
        worker.tasks.lock().insert(task_id, task);
        debug!(task = %task_id, worker = %worker.addr, "task placed");
        Ok(worker)
    }

    fn reclaim_task(&self, task_id: TaskId) -> Result<()> {
        let worker = {
            let mut table = self.workers.lock();
            let worker = table
                .by_task
                .remove(&task_id)
                .ok_or(Error::NotFound("task to reclaim"))?;
            table.task_count -= 1;
            worker
        };
        let task = worker.tasks.lock().remove(&task_id);
        match task {
            Some(mut task) => task.reclaim_handle(),
            None => return Err(Error::NotFound("task to reclaim")),
        }
        info!(task = %task_id, "task reclaimed");

        if worker.tasks.lock().is_empty() {
            let mut table = self.workers.lock();
            table.list.retain(|w| !Arc::ptr_eq(w, &worker));
            if table.suit.as_ref().is_some_and(|w| Arc::ptr_eq(w, &worker)) {
                table.suit = None;
            }
            drop(table);
            worker.io.shutdown();
            info!(addr = %worker.addr, "idle task worker destroyed");
        }
        Ok(())
    }

    /// Open a system-assigned UDP socket on its own reactor.
    fn create_worker(self: &Arc<Self>) -> Result<Arc<TaskWorker>> {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        let addr = SocketAddr::new(self.advertise_ip, socket.local_addr()?.port());

        let worker = Arc::new(TaskWorker {
            io: IoAsync::start(self.pool.clone()),
            handler: OnceLock::new(),
            addr,
            tasks: Mutex::new(HashMap::new()),
            nextseq: Mutex::new(0),
        });
        let on_packet = {
            let worker = Arc::downgrade(&worker);
            move |pkt: Packet, from: SocketAddr| {
                if let Some(worker) = worker.upgrade() {
                    worker.on_packet(&pkt, from);
                }
            }
        };
        let handler = worker.io.datagram(socket, on_packet, || {});
        let _ = worker.handler.set(handler);
        Ok(worker)
    }

    /// Send a control frame back to the coordinator.
    fn pkt_send(&self, msg_type: u8, payload: &[u8]) -> Result<()> {
        let handler = self
            .control
            .get()
            .ok_or(Error::NotFound("control stream"))?;
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

/// A reactor plus one UDP relay socket hosting up to
/// [`WORKER_MAX_TASK_COUNT`] tasks.
pub struct TaskWorker {
    io: IoAsync,
    handler: OnceLock<Arc<IoHandler>>,
    /// Relay endpoint advertised to the coordinator.
    pub addr: SocketAddr,
    tasks: Mutex<HashMap<TaskId, Box<dyn Task>>>,
    nextseq: Mutex<u16>,
}

impl TaskWorker {
    fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    fn on_packet(&self, pkt: &Packet, from: SocketAddr) {
        let data = Bytes::copy_from_slice(pkt);
        if let Err(e) = self.handle_packet(data, from) {
            if e.is_droppable() {
                debug!(%from, error = %e, "relay datagram dropped");
            } else {
                warn!(%from, error = %e, "relay datagram failed");
            }
        }
    }

    fn handle_packet(&self, data: Bytes, from: SocketAddr) -> Result<()> {
        let (head, payload) = split_datagram(data)?;
        match RelayMsg::from_code(head.msg_type) {
            Some(RelayMsg::TaskReq) => {
                let mut src = payload;
                let req = TaskReq::decode(&mut src)?;
                if src.len() < req.datalen as usize {
                    return Err(Error::InvalidInput("task req shorter than declared"));
                }
                src.truncate(req.datalen as usize);
                let mut tasks = self.tasks.lock();
                let task = tasks
                    .get_mut(&req.task_id)
                    .ok_or(Error::NotFound("task for datagram"))?;
                task.task_handle(self, &req, &src, from)
            }
            _ => Err(Error::InvalidInput("unexpected relay frame")),
        }
    }

    /// Frame `payload` once and queue it to every destination; the
    /// packet buffer is shared across the fan-out by refcount.
    pub fn pkt_multicast(&self, msg_type: u8, payload: &[u8], dests: &[SocketAddr]) -> Result<()> {
        let handler = self.handler.get().ok_or(Error::NotFound("worker handler"))?;
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
        let packet = pkb.freeze();
        for to in dests {
            handler.sendto(packet.clone(), *to);
        }
        Ok(())
    }
}

#[cfg(test)]
impl TaskWorker {
    /// Standalone worker on an ephemeral socket, for task unit tests.
    pub(crate) async fn test_rig() -> Arc<TaskWorker> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let worker = Arc::new(TaskWorker {
            io: IoAsync::start(PacketPool::new(2000, 8)),
            handler: OnceLock::new(),
            addr,
            tasks: Mutex::new(HashMap::new()),
            nextseq: Mutex::new(0),
        });
        let handler = worker.io.datagram(socket, |_, _| {}, || {});
        let _ = worker.handler.set(handler);
        worker
    }

    pub(crate) fn test_shutdown(&self) {
        self.io.shutdown();
    }
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("addr", &self.addr)
            .field("tasks", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
