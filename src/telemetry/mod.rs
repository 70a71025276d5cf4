//! Process-wide tracing setup for the binary. Library code only emits
//! `tracing` events.

pub mod config;
pub mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{init_telemetry, TelemetryGuard};
