//! Uplink Agent
//!
//! Site daemon keeping the network on its best uplink.
//!
//! - Receives per-link terminal telemetry over a local UDP relay
//! - Runs the failover coordinator against it every poll interval
//! - Executes recovery actions (reconnect, reboot, stow) as shell commands
//! - Serves status, reports and operator actions on a local HTTP portal

mod commands;
mod config;
mod portal;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

use uplink_core::events::MonitorEvent;
use uplink_core::thresholds::Scenario;
use uplink_core::{Coordinator, MonitorConfig};

use crate::commands::ShellCommands;
use crate::config::AgentConfig;
use crate::telemetry::TelemetryRelay;

/// Uplink failover agent daemon.
#[derive(Parser, Debug)]
#[command(name = "uplink-agent", about = "Multi-uplink health monitor and failover agent")]
struct Cli {
    /// Site configuration file (TOML).
    #[arg(long, short, default_value = "/etc/uplink/agent.toml")]
    config: PathBuf,

    /// Start in this scenario instead of the one in the config file.
    #[arg(long)]
    scenario: Option<Scenario>,

    /// Track issues without running automatic recovery.
    #[arg(long, default_value_t = false)]
    no_auto_recovery: bool,

    /// Portal listen address override.
    #[arg(long)]
    portal_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let mut monitor_config = MonitorConfig::from_toml_str(&raw)
        .with_context(|| format!("loading monitor config from {}", cli.config.display()))?;
    let mut agent_config = AgentConfig::from_toml_str(&raw)
        .with_context(|| format!("loading agent config from {}", cli.config.display()))?;

    if let Some(scenario) = cli.scenario {
        monitor_config.scenario = scenario;
    }
    if cli.no_auto_recovery {
        monitor_config.auto_recovery = false;
    }
    if let Some(addr) = cli.portal_addr {
        agent_config.portal_addr = Some(addr);
    }

    tracing::info!(
        config = %cli.config.display(),
        links = monitor_config.links.len(),
        scenario = %monitor_config.scenario,
        auto_recovery = monitor_config.auto_recovery,
        telemetry_addr = %agent_config.telemetry.listen_addr,
        "uplink-agent starting"
    );

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = Arc::new(TelemetryRelay::new(agent_config.telemetry.stale_after));
    let commands = Arc::new(ShellCommands::new(agent_config.commands.clone()));
    let monitor = Arc::new(Coordinator::new(monitor_config, relay.clone(), commands)?);

    // ── Task 1: Telemetry relay listener ────────────────────────
    let telemetry_addr = agent_config.telemetry.listen_addr;
    let telemetry_shutdown = shutdown_rx.clone();
    let mut telemetry_handle = tokio::spawn(async move {
        telemetry::run(relay, telemetry_addr, telemetry_shutdown).await
    });

    // ── Task 2: Coordinator tick loop ───────────────────────────
    let coordinator = monitor.clone();
    let coordinator_shutdown = shutdown_rx.clone();
    let mut coordinator_handle = tokio::spawn(async move {
        coordinator.run(coordinator_shutdown).await;
    });

    // ── Task 3: Event log ───────────────────────────────────────
    let events = monitor.subscribe();
    tokio::spawn(log_events(events));

    // ── Task 4: Site portal (HTTP) ──────────────────────────────
    let portal_monitor = monitor.clone();
    let portal_addr = agent_config.portal_addr;
    let portal_shutdown = shutdown_rx.clone();
    let mut portal_handle = tokio::spawn(async move {
        match portal_addr {
            Some(addr) => portal::run(portal_monitor, addr, portal_shutdown).await,
            None => {
                tracing::info!("portal disabled");
                std::future::pending().await
            }
        }
    });

    // ── Shutdown handling ───────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = &mut telemetry_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("telemetry listener failed: {e:#}"),
                Err(e) => tracing::error!("telemetry task failed: {e}"),
                Ok(Ok(())) => {}
            }
        }
        result = &mut coordinator_handle => {
            if let Err(e) = result {
                tracing::error!("coordinator task failed: {e}");
            }
        }
        result = &mut portal_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("portal failed: {e:#}"),
                Err(e) => tracing::error!("portal task failed: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);
    // Let an in-flight tick finish its probes before exiting.
    if !coordinator_handle.is_finished() {
        let _ = coordinator_handle.await;
    }

    tracing::info!("uplink-agent stopped");
    Ok(())
}

/// Log every monitor event as one JSON line at debug level.
async fn log_events(mut events: broadcast::Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(target: "uplink_agent::events", "{json}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode monitor event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
