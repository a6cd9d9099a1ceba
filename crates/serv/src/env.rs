// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the server binary.

use std::time::Duration;

use huddle_core::limits::{CLIENT_LOGIN_PORT, HEARTBEAT_PERIOD, NODE_SERV_LOGIN_PORT};

/// Ports the server binds or targets. Defaults are the platform's
/// well-known ports; `HUDDLE_CLIENT_PORT` and `HUDDLE_NODE_PORT`
/// override them (test rigs bind port 0 instead).
#[derive(Debug, Clone)]
pub struct ServConfig {
    pub client_port: u16,
    pub node_port: u16,
    /// Tick interval of the user liveness supervisor.
    pub heartbeat_period: Duration,
}

impl ServConfig {
    pub fn from_env() -> Self {
        Self {
            client_port: port_var("HUDDLE_CLIENT_PORT").unwrap_or(CLIENT_LOGIN_PORT),
            node_port: port_var("HUDDLE_NODE_PORT").unwrap_or(NODE_SERV_LOGIN_PORT),
            heartbeat_period: HEARTBEAT_PERIOD,
        }
    }

    /// Ephemeral ports for in-process test rigs.
    pub fn ephemeral() -> Self {
        Self { client_port: 0, node_port: 0, heartbeat_period: HEARTBEAT_PERIOD }
    }
}

impl Default for ServConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn port_var(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|s| s.parse::<u16>().ok())
}

/// Log filter, `HUDDLE_LOG` (e.g. `info`, `huddle_serv=debug`).
pub fn log_filter() -> String {
    std::env::var("HUDDLE_LOG").unwrap_or_else(|_| "info".to_string())
}
