//! # Node Configuration
//!
//! Environment-driven configuration with workable defaults for every
//! knob. `for_testing` keeps everything in-memory and fast.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use warden_evaluator::EvaluatorConfig;
use warden_ledger::AggregatorConfig;
use warden_pipeline::ConsumerConfig;
use warden_spend::SpendConfig;

/// Complete node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Data directory for the store file and partition locks.
    pub data_dir: PathBuf,
    /// Ledger and bus partition count.
    pub partitions: u32,
    /// Keep everything in memory (tests, dry runs).
    pub ephemeral: bool,
    /// Optional JSON pricebook to load at startup.
    pub pricebook_path: Option<PathBuf>,
    /// Merkle batch size threshold.
    pub batch_size_threshold: usize,
    /// Merkle batch time threshold in seconds.
    pub batch_time_threshold_secs: u64,
    /// Evaluator deadline in milliseconds.
    pub evaluator_deadline_ms: i64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            partitions: 4,
            ephemeral: false,
            pricebook_path: None,
            batch_size_threshold: 1024,
            batch_time_threshold_secs: 60,
            evaluator_deadline_ms: 100,
        }
    }
}

impl NodeConfig {
    /// Read configuration from `WARDEN_*` environment variables, falling
    /// back to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_var("WARDEN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            partitions: env_parsed("WARDEN_PARTITIONS").unwrap_or(defaults.partitions),
            ephemeral: env_var("WARDEN_EPHEMERAL").is_some(),
            pricebook_path: env_var("WARDEN_PRICEBOOK").map(PathBuf::from),
            batch_size_threshold: env_parsed("WARDEN_BATCH_SIZE")
                .unwrap_or(defaults.batch_size_threshold),
            batch_time_threshold_secs: env_parsed("WARDEN_BATCH_INTERVAL_SECS")
                .unwrap_or(defaults.batch_time_threshold_secs),
            evaluator_deadline_ms: env_parsed("WARDEN_EVAL_DEADLINE_MS")
                .unwrap_or(defaults.evaluator_deadline_ms),
        }
    }

    /// In-memory, small-threshold configuration for tests.
    #[must_use]
    pub fn for_testing(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            partitions: 2,
            ephemeral: true,
            pricebook_path: None,
            batch_size_threshold: 4,
            batch_time_threshold_secs: 1,
            evaluator_deadline_ms: 5_000,
        }
    }

    /// The aggregator tuning derived from this config.
    #[must_use]
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            size_threshold: self.batch_size_threshold,
            time_threshold: Duration::from_secs(self.batch_time_threshold_secs),
            ..AggregatorConfig::default()
        }
    }

    /// The evaluator tuning derived from this config.
    #[must_use]
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            deadline_ms: self.evaluator_deadline_ms,
            ..EvaluatorConfig::default()
        }
    }

    /// The consumer tuning derived from this config.
    #[must_use]
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
    }

    /// The spending cache tuning derived from this config.
    #[must_use]
    pub fn spend_config(&self) -> SpendConfig {
        SpendConfig::default()
    }

    /// Path of the store file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("warden.db")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}
