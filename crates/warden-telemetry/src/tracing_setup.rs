//! # Tracing Subscriber Setup

use crate::{TelemetryConfig, TelemetryError};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the subscriber installed; drop at process end.
pub struct TracingGuard {
    _private: (),
}

/// Install the global tracing subscriber.
///
/// Call once from the binary entry point. Libraries and tests that need
/// output use `tracing_subscriber`'s test helpers instead.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let result = if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    info!(filter = %config.log_filter, json = config.json, "Telemetry initialized");
    Ok(TracingGuard { _private: () })
}
