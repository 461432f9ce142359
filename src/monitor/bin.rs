//! Aegis Sync Monitor Binary
//!
//! A headless client that runs the sync engine against a backend and logs
//! connection-state transitions and collection counts. Useful for
//! verifying backend connectivity without the dashboard UI.
//!
//! # Usage
//!
//! ```bash
//! aegis-sync-monitor --api-base http://localhost:8080 --ws-base ws://localhost:8080
//! aegis-sync-monitor --scan 42 --interval-secs 10
//! ```

use std::time::Duration;

use clap::Parser;

use aegis_sync::{ConnectionState, SyncConfig, SyncEngine};

/// Aegis live-state sync monitor
#[derive(Parser, Debug)]
#[command(name = "aegis-sync-monitor")]
#[command(about = "Runs the Aegis sync engine and logs live state")]
struct Args {
    /// REST base URL
    #[arg(long, env = "AEGIS_API_BASE")]
    api_base: String,

    /// Push channel base URL
    #[arg(long, env = "AEGIS_WS_BASE")]
    ws_base: String,

    /// Watch a single scan's channel instead of the system channel
    #[arg(long)]
    scan: Option<u64>,

    /// Snapshot poll interval in seconds
    #[arg(long, default_value = "30")]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aegis_sync=info".parse()?)
                .add_directive("aegis_sync_monitor=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = SyncConfig::new(args.api_base, args.ws_base)?;
    config.poll_interval = Duration::from_secs(args.interval_secs);

    let engine = SyncEngine::new(config)?;
    let mut state_rx = engine.transport().subscribe_state();

    // Log every connection-state transition
    tokio::spawn(async move {
        loop {
            let state = *state_rx.borrow_and_update();
            tracing::info!(?state, "push channel state");
            if state == ConnectionState::Failed {
                tracing::warn!("reconnect budget exhausted, waiting for manual retry");
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = engine.start().await {
        tracing::error!("startup connect failed: {}", e);
    }
    if let Some(scan_id) = args.scan {
        if let Err(e) = engine.watch_scan(scan_id).await {
            tracing::error!(scan_id, "could not watch scan channel: {}", e);
        }
    }

    // Periodic one-line summary of what the stores hold
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stores = engine.stores();
                tracing::info!(
                    projects = stores.projects.len(),
                    scans = stores.scans.len(),
                    findings = stores.findings.len(),
                    insights = stores.insights.len(),
                    unread = engine.registry().unread_count(),
                    history = engine.transport().history_len(),
                    "store summary"
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("shutting down");
                break;
            }
        }
    }

    engine.shutdown();
    Ok(())
}
