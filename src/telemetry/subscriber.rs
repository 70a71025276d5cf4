use super::config::TelemetryConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Returned by [`init_telemetry`]; hold it for the life of the process.
#[must_use]
pub struct TelemetryGuard {
    installed: bool,
}

impl TelemetryGuard {
    /// `false` when another global subscriber was already in place.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber on first call; later calls return the
/// outcome of the first.
///
/// `RUST_LOG` wins over `config.log_filter`.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let installed = *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

        let layer = fmt::layer()
            .with_ansi(config.ansi)
            .with_target(config.show_target);
        let result = if config.compact {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };

        if result.is_ok() {
            tracing::info!(service = %config.service_name, "Tracing initialised");
        }
        result.is_ok()
    });

    TelemetryGuard { installed }
}
