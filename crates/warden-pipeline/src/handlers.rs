//! # Consumer Group Handlers
//!
//! The per-message logic behind the three consumer groups. All of them
//! tolerate redelivery: the ledger writer dedupes on
//! `(principal, producer_seq)`, and the metrics and audit handlers are
//! naturally idempotent enough for counters and log lines.

use crate::consumer::{HandlerError, MessageHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use warden_bus::{topics, ProducerDedupeCache, StoredMessage};
use warden_ledger::{LedgerRouter, WriterError};
use warden_spend::{Pricebook, PricebookError, PriceSource};
use warden_store::Clock;
use warden_telemetry::{DECISIONS_TOTAL, EVAL_LATENCY_MS, LEDGER_APPENDS};
use warden_types::{
    BusEnvelope, DecisionNotice, DecisionReason, EventBody, EventType, MeteringRecord, Outcome,
};

/// Consumer group names.
pub mod groups {
    /// Writes bus messages onto the ledger.
    pub const LEDGER_WRITER: &str = "ledger-writer";
    /// Feeds the metrics sink.
    pub const AGGREGATOR_METRICS: &str = "aggregator-metrics";
    /// Emits one structured audit log line per message.
    pub const AUDIT_LOGGER: &str = "audit-logger";
}

fn decode<T: serde::de::DeserializeOwned>(
    message: &StoredMessage,
) -> Result<BusEnvelope<T>, HandlerError> {
    let envelope: BusEnvelope<T> =
        serde_json::from_value(message.payload.clone()).map_err(HandlerError::new)?;
    envelope.validate_version().map_err(HandlerError::new)?;
    Ok(envelope)
}

// =============================================================================
// LEDGER WRITER GROUP
// =============================================================================

/// Turns metering records and decisions into ledger rows.
pub struct LedgerWriteHandler {
    ledger: Arc<LedgerRouter>,
    pricebook: Arc<Pricebook>,
    /// Source for the one-shot pricebook reload on an unknown resource.
    price_source: Option<Arc<dyn PriceSource>>,
}

impl LedgerWriteHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(ledger: Arc<LedgerRouter>, pricebook: Arc<Pricebook>) -> Self {
        Self {
            ledger,
            pricebook,
            price_source: None,
        }
    }

    /// Attach a price source for the unknown-resource reload path.
    #[must_use]
    pub fn with_price_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.price_source = Some(source);
        self
    }

    fn append(&self, body: EventBody) -> Result<(), HandlerError> {
        match self.ledger.append(body) {
            Ok(_) => {
                LEDGER_APPENDS.inc();
                Ok(())
            }
            // Redelivery of an already-appended message: success.
            Err(WriterError::Duplicate { .. }) => Ok(()),
            Err(e) => Err(HandlerError::new(e)),
        }
    }

    fn handle_metering(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        let envelope = decode::<MeteringRecord>(message)?;
        let record = &envelope.payload;

        let priced = match self.pricebook.price(&record.resource_type, record.quantity) {
            Err(PricebookError::UnknownResource { .. }) => {
                // One reload, then one more attempt; a still-unknown
                // resource is flagged on the event, never blocked.
                if let Some(source) = &self.price_source {
                    if let Err(e) = self.pricebook.reload_from(source.as_ref()) {
                        warn!(error = %e, "Pricebook reload failed");
                    }
                }
                self.pricebook.price(&record.resource_type, record.quantity)
            }
            other => other,
        };

        let mut body = EventBody::new(
            record.principal_id,
            EventType::Metering,
            message.published_ms,
        );
        body.mandate_id = record.mandate_id;
        body.action = Some(record.action.clone());
        body.resource = Some(record.resource.clone());
        body.correlation_id = envelope.correlation_id.clone();
        body.producer_seq = Some(envelope.producer_seq);
        match priced {
            Ok(cost) => body.cost = Some(cost),
            Err(e) => {
                warn!(
                    resource_type = %record.resource_type,
                    error = %e,
                    "Metering event flagged unpriced"
                );
                body.metadata = serde_json::to_vec(&serde_json::json!({
                    "unknown_resource": record.resource_type,
                }))
                .unwrap_or_default();
            }
        }
        self.append(body)
    }

    fn handle_decision(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        let envelope = decode::<DecisionNotice>(message)?;
        let notice = &envelope.payload;
        let decision = &notice.decision;

        let event_type = if decision.allowed {
            EventType::DecisionAllow
        } else {
            EventType::DecisionDeny
        };
        let mut body = EventBody::new(notice.principal_id, event_type, decision.evaluated_at_ms);
        body.mandate_id = Some(decision.mandate_id);
        body.action = Some(notice.requested_action.clone());
        body.resource = Some(notice.requested_resource.clone());
        body.outcome = Some(if decision.allowed {
            Outcome::Allow
        } else {
            Outcome::Deny
        });
        body.correlation_id = decision.correlation_id.clone();
        body.producer_seq = Some(envelope.producer_seq);
        body.metadata = serde_json::to_vec(&serde_json::json!({
            "reason": decision.reason,
        }))
        .unwrap_or_default();
        self.append(body)
    }
}

#[async_trait]
impl MessageHandler for LedgerWriteHandler {
    async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        match message.topic.as_str() {
            topics::METERING_EVENTS => self.handle_metering(message),
            topics::POLICY_DECISIONS => self.handle_decision(message),
            other => Err(HandlerError::new(format!(
                "ledger-writer received unexpected topic {other}"
            ))),
        }
    }
}

// =============================================================================
// METRICS GROUP
// =============================================================================

/// Feeds decision and latency metrics. Uses a dedupe window so a
/// redelivered decision does not double-count.
pub struct MetricsHandler {
    dedupe: Mutex<ProducerDedupeCache>,
    clock: Arc<dyn Clock>,
}

impl MetricsHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            dedupe: Mutex::new(ProducerDedupeCache::new()),
            clock,
        }
    }
}

#[async_trait]
impl MessageHandler for MetricsHandler {
    async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        if message.topic.as_str() != topics::POLICY_DECISIONS {
            return Ok(());
        }
        let envelope = decode::<DecisionNotice>(message)?;
        let fresh = self
            .dedupe
            .lock()
            .check_and_insert(
                &envelope.producer_id,
                envelope.producer_seq,
                self.clock.now_ms(),
            )
            .is_ok();
        if !fresh {
            return Ok(());
        }

        let reason = reason_label(envelope.payload.decision.reason);
        DECISIONS_TOTAL.with_label_values(&[reason]).inc();
        EVAL_LATENCY_MS.observe(envelope.payload.decision.latency_ms as f64);
        Ok(())
    }
}

fn reason_label(reason: DecisionReason) -> &'static str {
    match reason {
        DecisionReason::Allow => "Allow",
        DecisionReason::UnknownMandate => "UnknownMandate",
        DecisionReason::BadSignature => "BadSignature",
        DecisionReason::Revoked => "Revoked",
        DecisionReason::Expired => "Expired",
        DecisionReason::NotYetValid => "NotYetValid",
        DecisionReason::OutOfScope => "OutOfScope",
        DecisionReason::IntentMismatch => "IntentMismatch",
        DecisionReason::PolicyDenied => "PolicyDenied",
        DecisionReason::Canceled => "Canceled",
        DecisionReason::InternalError => "InternalError",
    }
}

// =============================================================================
// AUDIT LOGGER GROUP
// =============================================================================

/// One structured log line per message; the cheap, greppable audit tail.
#[derive(Default)]
pub struct AuditLogHandler;

impl AuditLogHandler {
    /// Create the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for AuditLogHandler {
    async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        match message.topic.as_str() {
            topics::POLICY_DECISIONS => {
                let envelope = decode::<DecisionNotice>(message)?;
                let n = &envelope.payload;
                info!(
                    principal = %n.principal_id,
                    mandate = %n.decision.mandate_id,
                    action = %n.requested_action,
                    resource = %n.requested_resource,
                    allowed = n.decision.allowed,
                    reason = ?n.decision.reason,
                    correlation = n.decision.correlation_id.as_deref().unwrap_or("-"),
                    "audit: decision"
                );
            }
            topics::METERING_EVENTS => {
                let envelope = decode::<MeteringRecord>(message)?;
                let r = &envelope.payload;
                info!(
                    principal = %r.principal_id,
                    action = %r.action,
                    resource = %r.resource,
                    resource_type = %r.resource_type,
                    quantity = r.quantity,
                    "audit: metering"
                );
            }
            other => {
                info!(topic = other, offset = message.offset, "audit: message");
            }
        }
        Ok(())
    }
}
