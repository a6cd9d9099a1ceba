// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The turn task: one group's relay.
//!
//! Participants arrive from the coordinator with the addresses it last
//! saw, but a relay can only trust what it observes: each entry starts
//! *pending*, and the first datagram a participant sends to the relay
//! socket fixes its endpoint and moves it to *running*. Every datagram
//! from a running participant is then fanned out verbatim to all other
//! running participants.

use std::any::Any;
use std::net::SocketAddr;

use bytes::Bytes;
use huddle_core::limits::{GROUP_MAX_USER, TASK_TURN};
use huddle_core::{Error, GroupId, Result, UserId};
use huddle_wire::{
    ControlOp, RelayMsg, TaskAssignHead, TaskControlHead, TaskReq, TurnAssign, TurnControl,
};
use tracing::{debug, info, warn};

use crate::node::TaskWorker;
use crate::task::{Task, TaskProtocol};

/// Protocol entry for the turn kind.
pub struct TurnProtocol;

impl TaskProtocol for TurnProtocol {
    fn kind(&self) -> u8 {
        TASK_TURN
    }

    fn init_assign_pkt(&self, info: &(dyn Any + Send + Sync), dst: &mut Vec<u8>) -> Result<()> {
        let assign = info
            .downcast_ref::<TurnAssign>()
            .ok_or(Error::InvalidInput("turn assign info expected"))?;
        assign.encode(dst)
    }

    fn init_control_pkt(&self, info: &(dyn Any + Send + Sync), dst: &mut Vec<u8>) -> Result<()> {
        let control = info
            .downcast_ref::<TurnControl>()
            .ok_or(Error::InvalidInput("turn control info expected"))?;
        control.encode(dst)
    }

    fn assign_handle(&self, head: &TaskAssignHead, body: Bytes) -> Result<Box<dyn Task>> {
        let assign = TurnAssign::decode(&mut body.clone())?;
        info!(task = %head.task_id, group = %assign.group_id, "turn task assigned");
        Ok(Box::new(TurnTask {
            group_id: assign.group_id,
            clients: assign
                .clients
                .into_iter()
                .map(|(user_id, addr)| Participant { user_id, addr, state: CliState::Pending })
                .collect(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliState {
    Pending,
    Running,
}

#[derive(Debug)]
struct Participant {
    user_id: UserId,
    addr: SocketAddr,
    state: CliState,
}

struct TurnTask {
    group_id: GroupId,
    clients: Vec<Participant>,
}

impl Task for TurnTask {
    fn kind(&self) -> u8 {
        TASK_TURN
    }

    fn control_handle(&mut self, head: &TaskControlHead, body: Bytes) -> Result<()> {
        let control = TurnControl::decode(&mut body.clone())?;
        match ControlOp::from_code(head.opt) {
            Some(ControlOp::Join) => {
                if self.clients.len() >= GROUP_MAX_USER {
                    return Err(Error::Exhausted("turn roster full"));
                }
                debug!(group = %self.group_id, user = %control.user_id, "turn join");
                self.clients.push(Participant {
                    user_id: control.user_id,
                    addr: control.addr,
                    state: CliState::Pending,
                });
                Ok(())
            }
            Some(ControlOp::Leave) => {
                match self.clients.iter().position(|c| c.user_id == control.user_id) {
                    Some(idx) => {
                        debug!(group = %self.group_id, user = %control.user_id, "turn leave");
                        self.clients.swap_remove(idx);
                        Ok(())
                    }
                    None => Err(Error::NotFound("participant not in roster")),
                }
            }
            None => Err(Error::InvalidInput("unknown turn control op")),
        }
    }

    fn reclaim_handle(&mut self) {
        info!(group = %self.group_id, "turn task reclaimed");
        self.clients.clear();
    }

    fn task_handle(
        &mut self,
        worker: &TaskWorker,
        req: &TaskReq,
        inner: &[u8],
        from: SocketAddr,
    ) -> Result<()> {
        let mut known = false;
        for cli in &mut self.clients {
            if cli.user_id != req.user_id {
                continue;
            }
            known = true;
            if cli.state == CliState::Pending {
                // First packet fixes the reachable endpoint; later
                // sources never overwrite it.
                cli.addr = from;
                cli.state = CliState::Running;
                info!(group = %self.group_id, user = %req.user_id, %from, "participant running");
            }
            break;
        }
        if !known {
            warn!(group = %self.group_id, user = %req.user_id, "datagram from unknown participant");
            return Err(Error::NotFound("sender not in roster"));
        }

        let peers: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|c| c.state == CliState::Running && c.user_id != req.user_id)
            .map(|c| c.addr)
            .collect();
        if !peers.is_empty() {
            worker.pkt_multicast(RelayMsg::TurnPack.code(), inner, &peers)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
