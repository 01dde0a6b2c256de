//! # Telemetry Configuration

use serde::Deserialize;

/// Configuration for logging output.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directives (`info`, `warden_evaluator=debug`, …).
    pub log_filter: String,
    /// Emit JSON lines instead of the human format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `WARDEN_LOG` / `WARDEN_LOG_JSON` with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("WARDEN_LOG").unwrap_or_else(|_| "info".to_string()),
            json: std::env::var("WARDEN_LOG_JSON").is_ok(),
        }
    }
}
