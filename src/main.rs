use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use tacsync::config::load_config;
use tacsync::config::TacsyncConfig;
use tacsync::facade::TacticalState;
use tacsync::transport::NullTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tacsync=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to load config from {path}"))?,
        None => TacsyncConfig::default(),
    };

    info!(
        room = %config.replication.room,
        tick_ms = config.scheduler.tick_interval_ms,
        "starting tacsync"
    );

    let state = TacticalState::new(&config, Arc::new(NullTransport));

    let tick_state = state.clone();
    let tick_interval = config.scheduler.tick_interval_ms;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(tick_interval));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick_state.tick(Utc::now());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
