// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator (center server): one reactor carrying the client
//! login socket and every node control stream, plus the timer service
//! behind heartbeats.

mod clients;
pub mod nodes;

pub use clients::{ClientMgr, GroupRecord, UserRecord};
pub use nodes::{NodeMgr, NodeRecord, TaskHandle};

use std::net::SocketAddr;

use huddle_core::limits::PACKET_MAX_PAYLOAD;
use huddle_core::Result;
use huddle_ioasync::{IoAsync, PacketPool, TimerService};
use tracing::info;

use crate::env::ServConfig;
use crate::task::TaskRegistry;

/// Initial packet buffers for the coordinator's pool.
const COORD_POOL_INIT: usize = 64;

/// Everything the coordinator role runs.
pub struct CenterServer {
    io: IoAsync,
    timers: TimerService,
    clients: ClientMgr,
    nodes: NodeMgr,
}

impl CenterServer {
    /// Bind both login ports and start serving.
    pub async fn start(config: &ServConfig) -> Result<Self> {
        let pool = PacketPool::new(PACKET_MAX_PAYLOAD, COORD_POOL_INIT);
        let io = IoAsync::start(pool);
        let timers = TimerService::start();
        let registry = TaskRegistry::with_builtin();

        let nodes = NodeMgr::listen(
            io.clone(),
            registry,
            SocketAddr::from(([0, 0, 0, 0], config.node_port)),
        )
        .await?;
        let clients = ClientMgr::listen(
            io.clone(),
            timers.clone(),
            nodes.clone(),
            SocketAddr::from(([0, 0, 0, 0], config.client_port)),
            config.heartbeat_period,
        )
        .await?;

        info!("center server up");
        Ok(Self { io, timers, clients, nodes })
    }

    pub fn clients(&self) -> &ClientMgr {
        &self.clients
    }

    pub fn nodes(&self) -> &NodeMgr {
        &self.nodes
    }

    /// Address node servers connect to.
    pub fn node_addr(&self) -> SocketAddr {
        self.nodes.local_addr()
    }

    /// Address clients log in to.
    pub fn client_addr(&self) -> SocketAddr {
        self.clients.local_addr()
    }

    pub fn shutdown(&self) {
        self.clients.shutdown();
        self.nodes.shutdown();
        self.timers.shutdown();
        self.io.shutdown();
        info!("center server down");
    }
}

impl std::fmt::Debug for CenterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CenterServer")
            .field("clients", &self.clients)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Convenience used by the `full` mode and tests: a node server in the
/// same process, connected back to this coordinator.
pub async fn start_local_node(center: &CenterServer) -> Result<crate::node::NodeServer> {
    let pool = PacketPool::new(PACKET_MAX_PAYLOAD, COORD_POOL_INIT);
    let io = IoAsync::start(pool);
    let registry = TaskRegistry::with_builtin();
    let addr = SocketAddr::from(([127, 0, 0, 1], center.node_addr().port()));
    crate::node::NodeServer::connect(io, addr, registry).await
}

#[cfg(test)]
#[path = "coord_tests.rs"]
mod tests;
