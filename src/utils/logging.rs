//! Logging utilities (thin wrappers over `tracing`)

/// Log levels for the indexer
#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

fn silenced() -> bool {
    std::env::var("ENERGY_INDEXER_SILENT").is_ok()
}

/// Logs a message
pub fn log(level: LogLevel, message: &str) {
    if silenced() {
        return;
    }

    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}

/// Masks the value of an `api-key=` query parameter.
#[must_use]
pub fn redact_url(url: &str) -> String {
    match url.find("api-key=") {
        Some(pos) => {
            let before = &url[..pos + 8];
            let after = &url[pos + 8..];
            let end_pos = after.find('&').unwrap_or(after.len());
            format!("{}[REDACTED]{}", before, &after[end_pos..])
        }
        None => url.to_string(),
    }
}

/// Logs worker startup information
pub fn log_startup(program_name: &str, program_id: &str, checkpoint: u64) {
    if silenced() {
        return;
    }

    tracing::info!(
        program = program_name,
        program_id = program_id,
        checkpoint_height = checkpoint,
        "Program worker startup"
    );
}

/// Logs the ledger endpoints with API keys masked
pub fn log_endpoints(rpc_url: &str, ws_url: &str) {
    if silenced() {
        return;
    }

    tracing::info!(
        rpc_url = %redact_url(rpc_url),
        ws_url = %redact_url(ws_url),
        "Ledger endpoints"
    );
}

/// Logs a section header
pub fn log_section(title: &str) {
    tracing::info!("=== {} ===", title);
}

/// Logs transaction processing
pub fn log_transaction(program: &str, signature: &str, slot: u64, records: usize) {
    tracing::debug!(
        program = program,
        signature = signature,
        slot = slot,
        records = records,
        "Processed transaction"
    );
}

/// Logs backfill progress summary
pub fn log_batch(program: &str, processed: usize, total: usize, duration_ms: u64) {
    if silenced() {
        return;
    }
    if processed > 0 {
        tracing::info!(
            program = program,
            processed = processed,
            total = total,
            duration_ms = duration_ms,
            "Backfill batch processed"
        );
    }
}

/// Logs an error with context
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context = context, error = error, "Indexer error");
}
