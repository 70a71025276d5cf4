/// How the binary's tracing output is filtered and rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Attached to the first event so mixed log streams can be told apart.
    pub service_name: String,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub ansi: bool,
    /// Single-line events instead of the full format.
    pub compact: bool,
    pub show_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "energy-indexer".into(),
            log_filter: "info,sqlx=warn,tungstenite=warn".into(),
            ansi: true,
            compact: false,
            show_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Defaults adjusted by `LOG_FILTER`, `LOG_COMPACT`, `NO_COLOR` and
    /// `ENERGY_INDEXER_SILENT` (which turns every event off).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            if !filter.trim().is_empty() {
                config.log_filter = filter;
            }
        }
        if std::env::var("LOG_COMPACT").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            config.compact = true;
        }
        if std::env::var_os("NO_COLOR").is_some() {
            config.ansi = false;
        }
        if std::env::var_os("ENERGY_INDEXER_SILENT").is_some() {
            config.log_filter = "off".into();
        }
        config
    }
}
