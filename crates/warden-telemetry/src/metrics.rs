//! # Prometheus Metrics
//!
//! The metrics sink is the one process-wide registry in the system; every
//! other handle is passed in at construction.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Histogram, IntCounter, IntCounterVec, Registry,
};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();

    /// Decisions by reason ("Allow", "OutOfScope", …).
    pub static ref DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "warden_decisions_total",
        "Authority decisions by reason",
        &["reason"],
        REGISTRY
    )
    .expect("decision counter registration");

    /// Evaluation latency in milliseconds.
    pub static ref EVAL_LATENCY_MS: Histogram = register_histogram_with_registry!(
        "warden_eval_latency_ms",
        "Evaluation latency in milliseconds",
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0],
        REGISTRY
    )
    .expect("latency histogram registration");

    /// Ledger rows appended.
    pub static ref LEDGER_APPENDS: IntCounter = register_int_counter_with_registry!(
        "warden_ledger_appends_total",
        "Ledger events appended",
        REGISTRY
    )
    .expect("append counter registration");

    /// Merkle batches sealed.
    pub static ref BATCHES_SEALED: IntCounter = register_int_counter_with_registry!(
        "warden_batches_sealed_total",
        "Merkle batches sealed",
        REGISTRY
    )
    .expect("batch counter registration");

    /// Consumer handler retries.
    pub static ref CONSUMER_RETRIES: IntCounterVec = register_int_counter_vec_with_registry!(
        "warden_consumer_retries_total",
        "Handler retries by consumer group",
        &["group"],
        REGISTRY
    )
    .expect("retry counter registration");

    /// Messages dead-lettered.
    pub static ref DLQ_MESSAGES: IntCounterVec = register_int_counter_vec_with_registry!(
        "warden_dlq_messages_total",
        "Messages published to the dead-letter topic by consumer group",
        &["group"],
        REGISTRY
    )
    .expect("dlq counter registration");

    /// Messages replayed during recovery.
    pub static ref REPLAY_MESSAGES: IntCounter = register_int_counter_with_registry!(
        "warden_replay_messages_total",
        "Messages replayed through recovery",
        REGISTRY
    )
    .expect("replay counter registration");
}

/// The registry backing all Warden metrics, for scrape endpoints.
#[must_use]
pub fn metrics_registry() -> &'static Registry {
    &REGISTRY
}
