//! Provenance ledger node binary
//!
//! Usage: `provenance-node [config.toml]`. Without a path, configuration is
//! read from `PROVENANCE_*` environment variables.

use anyhow::Context;
use provenance_ledger::{actor, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .and_then(Config::with_env_overrides)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        "Starting provenance ledger node"
    );

    // Open ledger
    let ledger = actor::open(&config).context("opening ledger")?;

    let health = ledger.health().await?;
    tracing::info!(
        is_valid = health.is_valid,
        chain_length = health.chain_length,
        pending = health.pending_transactions,
        latest_hash = %health.latest_hash,
        "Ledger ready"
    );

    let violations = ledger.verify_integrity().await?;
    for violation in &violations {
        tracing::error!(%violation, "Integrity violation");
    }

    tokio::signal::ctrl_c().await?;

    tracing::debug!(metrics = %ledger.metrics_text().await?, "Final metrics");
    tracing::info!("Shutting down provenance ledger node");
    ledger.shutdown().await?;
    Ok(())
}
