// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `serv` binary: run the coordinator, a node server, or both.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use huddle_core::limits::PACKET_MAX_PAYLOAD;
use huddle_ioasync::{IoAsync, PacketPool};
use huddle_serv::coord::{start_local_node, CenterServer};
use huddle_serv::{env, NodeServer, ServConfig, TaskRegistry};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Coordinator only.
    Center,
    /// Node server only; connects to `--server`.
    Node,
    /// Coordinator plus one node server in this process.
    Full,
}

#[derive(Debug, Parser)]
#[command(name = "serv", about = "Huddle session-relay server")]
struct Args {
    /// Role to run.
    #[arg(short = 'm', long = "mode")]
    mode: Mode,

    /// Coordinator host to connect to (node mode).
    #[arg(short = 's', long = "server", default_value = "127.0.0.1")]
    server: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env::log_filter()))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> huddle_core::Result<()> {
    let config = ServConfig::from_env();

    let center = match args.mode {
        Mode::Center | Mode::Full => Some(CenterServer::start(&config).await?),
        Mode::Node => None,
    };

    let node = match args.mode {
        Mode::Node => {
            let pool = PacketPool::new(PACKET_MAX_PAYLOAD, 64);
            let io = IoAsync::start(pool);
            let registry = TaskRegistry::with_builtin();
            let addr: SocketAddr =
                tokio::net::lookup_host((args.server.as_str(), config.node_port))
                    .await?
                    .next()
                    .ok_or(huddle_core::Error::InvalidInput("server address unresolvable"))?;
            Some(NodeServer::connect(io, addr, registry).await?)
        }
        Mode::Full => match &center {
            Some(center) => Some(start_local_node(center).await?),
            None => None,
        },
        Mode::Center => None,
    };

    info!(mode = ?args.mode, "serv running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    if let Some(node) = &node {
        node.shutdown();
    }
    if let Some(center) = &center {
        center.shutdown();
    }
    info!("clean shutdown");
    Ok(())
}
