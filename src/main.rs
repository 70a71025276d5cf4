//! Energy indexer - runs one worker per configured program until Ctrl+C or
//! SIGTERM.

use energy_indexer::cache::build_dedup_cache;
use energy_indexer::core::supervisor::shutdown_signal;
use energy_indexer::storage::{PostgresSink, Sink};
use energy_indexer::telemetry::{init_telemetry, TelemetryConfig};
use energy_indexer::utils::logging::{log_endpoints, log_section};
use energy_indexer::{IndexerConfig, Result, RpcLedger, Supervisor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env());
    let config = IndexerConfig::from_env()?;

    log_section("Energy Indexer");
    log_endpoints(&config.rpc_url, &config.ws_url);
    for program in &config.programs {
        tracing::info!(program = %program.name, program_id = %program.program_id, "Configured program");
    }

    let sink = PostgresSink::new(&config.database_url, config.db_max_connections).await?;
    sink.initialize().await?;
    let sink: Arc<dyn Sink> = Arc::new(sink);
    let cache = build_dedup_cache(&config.dedup).await?;
    let ledger = Arc::new(RpcLedger::from_config(&config));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let counters = Supervisor::from_config(&config, ledger, sink, cache, token)
        .run()
        .await;

    let failed: Vec<&str> = counters
        .iter()
        .filter(|(_, c)| c.fatal.is_some())
        .map(|(name, _)| name.as_str())
        .collect();
    if !failed.is_empty() {
        tracing::warn!(programs = ?failed, "Some workers failed to start");
    }

    log_section("Shutdown complete");
    Ok(())
}
