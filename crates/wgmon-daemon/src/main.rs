// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Monitor Contributors

// WireGuard Monitor - Daemon
// Tracks WireGuard units and probes tunnel reachability

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wgmon_core::{
    MonitorConfig, MonitorEngine, PingProber, Status, SystemCommandRunner, SystemNetworkStack,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "WireGuard tunnel health monitor")]
struct Args {
    /// Path to the monitor configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wgmon_core=debug,wgmon_daemon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("WireGuard Monitor Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => MonitorConfig::load_from(path),
        None => MonitorConfig::load(),
    }
    .context("Failed to load monitor configuration")?;
    info!("Ping address file: {}", config.ping_address_file.display());
    info!("Helper: {}", config.helper_path.display());

    let shutdown = CancellationToken::new();

    let runner = Arc::new(SystemCommandRunner);
    let netstack = Arc::new(SystemNetworkStack::new(runner.clone()));
    netstack.spawn_monitor(shutdown.child_token());

    let engine = MonitorEngine::new(
        runner,
        netstack,
        Arc::new(PingProber),
        Arc::new(config),
    );
    engine.start().await;
    info!("Daemon started successfully");

    // Follow status transitions for logging
    let logger_engine = engine.clone();
    let logger_cancel = shutdown.child_token();
    tokio::spawn(async move {
        log_status_changes(logger_engine, logger_cancel).await;
    });

    wait_for_shutdown().await;

    engine.stop();
    shutdown.cancel();
    info!("Daemon shut down");
    Ok(())
}

/// Log every status transition of every tracked connection. Connected
/// tunnels include their probe latency.
async fn log_status_changes(engine: MonitorEngine, cancel: CancellationToken) {
    let mut collection_rx = engine.subscribe();
    let mut statuses: StreamMap<String, WatchStream<Status>> = StreamMap::new();

    loop {
        // Rebuild the per-connection streams for the current set
        let connections = engine.connections();
        debug!("Following {} tunnel(s)", connections.len());
        statuses.clear();
        for conn in connections.iter() {
            statuses.insert(
                conn.name().to_string(),
                WatchStream::from_changes(conn.subscribe_status()),
            );
        }

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = collection_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                Some((name, status)) = statuses.next(), if !statuses.is_empty() => {
                    match engine.find(&name) {
                        Some(conn) if status.is_connected() => {
                            info!("{}: {} ({:.1} ms)", name, status, conn.latency_ms());
                        }
                        _ => info!("{}: {}", name, status),
                    }
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");

    #[cfg(unix)]
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    };

    #[cfg(not(unix))]
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    };
}
