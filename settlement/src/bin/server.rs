use anyhow::Context;
use settlement::{
    config::LedgerMode, Config, LedgerClient, SettlementEngine, SimulatedLedger,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Settlement engine starting...");

    // Config file from the first argument, otherwise environment only
    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        threshold_drops = config.settlement.threshold_drops,
        funding_cutoff_drops = config.settlement.funding_cutoff_drops,
        debounce_ms = config.settlement.debounce_ms,
        "Configuration loaded"
    );

    let client: Arc<dyn LedgerClient> = match config.ledger.mode {
        LedgerMode::Simulated => {
            info!(server = %config.ledger.server, "Using simulated ledger");
            Arc::new(SimulatedLedger::new())
        }
    };

    let engine = SettlementEngine::new(&config, client)?;
    engine.start().await?;

    info!("Settlement engine ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    engine.shutdown().await?;
    info!(metrics = %engine.metrics().gather_text(), "Settlement engine stopped");

    Ok(())
}
