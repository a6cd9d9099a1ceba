// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable task kinds.
//!
//! A [`TaskProtocol`] covers both ends of a task's life: the
//! coordinator side builds the kind-specific payload bodies for
//! assign/reclaim/control frames, and the node side turns an assign
//! payload into a live [`Task`] that handles roster control and relay
//! datagrams. The registry is owned by whoever runs tasks (the
//! coordinator's node manager, the node server); it is not a process
//! global, and tests build a fresh one per case.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use huddle_core::Result;
use huddle_wire::{TaskAssignHead, TaskControlHead, TaskReq};
use parking_lot::Mutex;

use crate::node::TaskWorker;

/// One task kind's operations.
///
/// The `info` arguments are kind-specific records downcast by the
/// implementation; the turn kind uses the wire body structs directly.
pub trait TaskProtocol: Send + Sync {
    fn kind(&self) -> u8;

    /// Coordinator: append the kind-specific assign body for `info`.
    fn init_assign_pkt(&self, info: &(dyn Any + Send + Sync), dst: &mut Vec<u8>) -> Result<()>;

    /// Coordinator: append the kind-specific reclaim body.
    fn init_reclaim_pkt(&self, _dst: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Coordinator: append the kind-specific control body for `info`.
    fn init_control_pkt(&self, info: &(dyn Any + Send + Sync), dst: &mut Vec<u8>) -> Result<()>;

    /// Node: build the live task from an assign payload.
    fn assign_handle(&self, head: &TaskAssignHead, body: Bytes) -> Result<Box<dyn Task>>;
}

/// A live task hosted on a node-side task worker.
pub trait Task: Send {
    fn kind(&self) -> u8;

    /// Kind-specific extra bytes for the assign response. The generic
    /// response (task id, kind, worker address) is built by the node.
    fn init_assign_response_pkt(&self, _dst: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// A control frame for this task arrived from the coordinator.
    fn control_handle(&mut self, head: &TaskControlHead, body: Bytes) -> Result<()>;

    /// The task is being torn down.
    fn reclaim_handle(&mut self) {}

    /// One relay datagram from a participant. `inner` is the opaque
    /// application payload after the task-req envelope.
    fn task_handle(
        &mut self,
        worker: &TaskWorker,
        req: &TaskReq,
        inner: &[u8],
        from: SocketAddr,
    ) -> Result<()>;
}

/// Kind → protocol table. Registration is idempotent by kind.
pub struct TaskRegistry {
    protos: Mutex<HashMap<u8, Arc<dyn TaskProtocol>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { protos: Mutex::new(HashMap::new()) }
    }

    /// A registry with every built-in kind registered.
    pub fn with_builtin() -> Arc<Self> {
        let registry = Arc::new(Self::new());
        registry.register(Arc::new(crate::node::turn::TurnProtocol));
        registry
    }

    pub fn register(&self, proto: Arc<dyn TaskProtocol>) {
        self.protos.lock().entry(proto.kind()).or_insert(proto);
    }

    pub fn unregister(&self, kind: u8) {
        self.protos.lock().remove(&kind);
    }

    pub fn find(&self, kind: u8) -> Option<Arc<dyn TaskProtocol>> {
        self.protos.lock().get(&kind).cloned()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<u8> = self.protos.lock().keys().copied().collect();
        f.debug_struct("TaskRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
