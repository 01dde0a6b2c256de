//! # Warden Telemetry
//!
//! Observability for the authority service: structured logging via
//! `tracing` and Prometheus metrics for decisions, ledger appends, batch
//! sealing, and consumer health.
//!
//! Libraries never install a subscriber; only the node binary and tests
//! call [`init_telemetry`].
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WARDEN_LOG` | `info` | Log level filter (tracing `EnvFilter` syntax) |
//! | `WARDEN_LOG_JSON` | unset | Any value switches to JSON log output |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    metrics_registry, BATCHES_SEALED, CONSUMER_RETRIES, DECISIONS_TOTAL, DLQ_MESSAGES,
    EVAL_LATENCY_MS, LEDGER_APPENDS, REPLAY_MESSAGES,
};
pub use tracing_setup::{init_telemetry, TracingGuard};

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A subscriber is already installed.
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    /// The filter directive in `WARDEN_LOG` did not parse.
    #[error("Invalid log filter: {0}")]
    Filter(String),
}
