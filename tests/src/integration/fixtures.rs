//! # Test Harness
//!
//! The full service graph wired by hand: in-memory store and bus, one
//! writer and aggregator per partition, the mandate manager, the
//! evaluator, and the consumer handlers. Consumers are driven explicitly
//! with `run_once` so tests stay deterministic; no background loops.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;
use warden_bus::{topics, InMemoryBus};
use warden_crypto::{InMemoryKeyRegistry, Keypair, PublicKey};
use warden_evaluator::{Evaluator, EvaluatorConfig};
use warden_ledger::{
    AggregatorConfig, KeypairBatchSigner, LedgerRouter, LedgerWriter, MerkleAggregator,
    SpendingRecorder,
};
use warden_mandates::{IssueParams, MandateManager, PolicyDraft};
use warden_pipeline::{
    groups, AuditLogHandler, ConsumerConfig, ConsumerWorker, LedgerWriteHandler, MessageHandler,
    Replayer,
};
use warden_spend::{Price, Pricebook, SpendConfig, SpendingCache, StoreHistory};
use warden_store::{Clock, ManualClock, MemoryStore, Store};
use warden_types::{
    BusEnvelope, Decision, EvaluationRequest, EventType, Hash, LedgerEvent, Mandate, MandateId,
    MeteringRecord, Partition, Principal, PrincipalId,
};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const START_MS: i64 = 1_700_000_000_000;

/// The assembled system under test.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<InMemoryBus>,
    pub clock: Arc<ManualClock>,
    pub keys: Arc<InMemoryKeyRegistry>,
    pub ledger: Arc<LedgerRouter>,
    pub manager: MandateManager,
    pub evaluator: Evaluator,
    pub pricebook: Arc<Pricebook>,
    pub spending: Arc<SpendingCache>,
    pub history: Arc<StoreHistory>,
    pub ledger_handler: Arc<LedgerWriteHandler>,
    pub aggregators: Vec<Arc<MerkleAggregator>>,
    pub verification_keys: HashMap<String, PublicKey>,
    pub partitions: u32,
    meter_seq: std::sync::atomic::AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_aggregator_config(AggregatorConfig::for_testing())
    }

    pub fn with_aggregator_config(agg_config: AggregatorConfig) -> Self {
        let partitions = 2;
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let keys = Arc::new(InMemoryKeyRegistry::new());
        let clock = Arc::new(ManualClock::at(START_MS));
        let bus = Arc::new(InMemoryBus::new(partitions));
        let spending = Arc::new(SpendingCache::new(
            SpendConfig::default(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let history = Arc::new(StoreHistory::new(store.clone() as Arc<dyn Store>));

        let signer = Arc::new(KeypairBatchSigner::new("ledger-key-1", Keypair::generate()));
        let verification_keys =
            HashMap::from([("ledger-key-1".to_string(), signer.public_key())]);

        let mut writers = Vec::new();
        let mut aggregators = Vec::new();
        for partition in 0..partitions {
            let writer = LedgerWriter::new(store.clone() as Arc<dyn Store>, partition)
                .with_spending(spending.clone() as Arc<dyn SpendingRecorder>);
            writers.push(Arc::new(writer));
            aggregators.push(Arc::new(MerkleAggregator::new(
                store.clone() as Arc<dyn Store>,
                partition,
                signer.clone(),
                clock.clone() as Arc<dyn Clock>,
                agg_config.clone(),
            )));
        }
        let ledger = Arc::new(LedgerRouter::new(writers, partitions));

        let manager = MandateManager::new(
            store.clone() as Arc<dyn Store>,
            ledger.clone(),
            keys.clone(),
            clock.clone() as Arc<dyn Clock>,
        )
        .with_bus(bus.clone());

        let evaluator = Evaluator::new(
            store.clone() as Arc<dyn Store>,
            clock.clone() as Arc<dyn Clock>,
            EvaluatorConfig::for_testing(),
        )
        .with_bus(bus.clone());

        let pricebook = Arc::new(Pricebook::new(HashMap::from([
            (
                "api:openai:gpt-4".to_string(),
                Price {
                    unit_cost_minor: 3,
                    currency: warden_types::Currency::USD,
                },
            ),
            (
                "api:anthropic:claude".to_string(),
                Price {
                    unit_cost_minor: 5,
                    currency: warden_types::Currency::USD,
                },
            ),
        ])));
        let ledger_handler = Arc::new(LedgerWriteHandler::new(ledger.clone(), pricebook.clone()));

        Self {
            store,
            bus,
            clock,
            keys,
            ledger,
            manager,
            evaluator,
            pricebook,
            spending,
            history,
            ledger_handler,
            aggregators,
            verification_keys,
            partitions,
            meter_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn replayer(&self) -> Replayer {
        Replayer::new(
            self.store.clone() as Arc<dyn Store>,
            self.bus.clone(),
            self.ledger_handler.clone(),
            self.spending.clone(),
            self.clock.clone() as Arc<dyn Clock>,
        )
    }

    // --- principals & policies -------------------------------------------

    pub fn principal(&self) -> PrincipalId {
        self.principal_with(false)
    }

    pub fn admin(&self) -> PrincipalId {
        self.principal_with(true)
    }

    fn principal_with(&self, is_admin: bool) -> PrincipalId {
        let id = Uuid::new_v4();
        let public = self.keys.generate_for(id);
        self.manager
            .create_principal(Principal {
                id,
                public_key: public.into(),
                display_name: format!("agent-{}", &id.to_string()[..8]),
                owner: "ops".to_string(),
                parent: None,
                created_ms: self.clock.now_ms(),
                deactivated: false,
                is_admin,
            })
            .expect("create principal");
        id
    }

    /// The policy from scenario S1: `api:*:*`, action `call`, 1 h max
    /// validity, depth 3.
    pub fn standard_policy(&self, principal: PrincipalId) {
        self.manager
            .set_policy(PolicyDraft {
                principal_id: principal,
                resources: vec!["api:*:*".parse().expect("pattern")],
                actions: BTreeSet::from(["call".to_string()]),
                max_validity_ms: HOUR_MS,
                max_delegation_depth: 3,
                delegation_permitted: true,
            })
            .expect("set policy");
    }

    // --- mandates ---------------------------------------------------------

    pub fn issue_params(&self, issuer: PrincipalId, subject: PrincipalId) -> IssueParams {
        let now = self.clock.now_ms();
        IssueParams {
            issuer,
            subject,
            resources: vec!["api:openai:gpt-4".parse().expect("pattern")],
            actions: BTreeSet::from(["call".to_string()]),
            not_before_ms: now,
            not_after_ms: now + 600_000,
            intent_hash: None,
            parent_id: None,
            correlation_id: None,
        }
    }

    pub fn issue(&self, issuer: PrincipalId, subject: PrincipalId) -> Mandate {
        self.manager
            .issue(self.issue_params(issuer, subject))
            .expect("issue mandate")
    }

    pub fn delegate(&self, holder: PrincipalId, parent: &Mandate) -> Mandate {
        let mut params = self.issue_params(holder, holder);
        params.parent_id = Some(parent.id);
        params.not_before_ms = parent.not_before_ms + 1_000;
        params.not_after_ms = parent.not_after_ms - 1_000;
        self.manager.issue(params).expect("delegate mandate")
    }

    // --- evaluation -------------------------------------------------------

    pub fn request(&self, mandate: &Mandate, action: &str, resource: &str) -> EvaluationRequest {
        EvaluationRequest {
            mandate_id: mandate.id,
            requested_action: action.to_string(),
            requested_resource: resource.to_string(),
            intent_claim: None,
            correlation_id: Some(format!("corr-{}", mandate.id)),
        }
    }

    pub fn evaluate(&self, mandate: &Mandate, action: &str, resource: &str) -> Decision {
        self.evaluator
            .evaluate(&self.request(mandate, action, resource))
    }

    // --- bus driving ------------------------------------------------------

    /// Publish a metering record the way the proxy would after an allowed
    /// action executes.
    pub fn publish_metering(&self, principal: PrincipalId, mandate: Option<MandateId>, quantity: u64) {
        let seq = self
            .meter_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let record = MeteringRecord {
            principal_id: principal,
            mandate_id: mandate,
            action: "call".to_string(),
            resource: "api:openai:gpt-4".to_string(),
            resource_type: "api:openai:gpt-4".to_string(),
            quantity,
        };
        let envelope = BusEnvelope::new(
            "proxy",
            seq,
            principal.to_string(),
            self.clock.now_ms(),
            record,
        );
        self.bus
            .publish(topics::METERING_EVENTS, &envelope)
            .expect("publish metering");
    }

    /// Drive the ledger-writer group over both its topics until the logs
    /// are drained. Deterministic stand-in for the background workers.
    pub async fn drain_ledger_group(&self) -> usize {
        let mut handled = 0;
        for topic in [topics::POLICY_DECISIONS, topics::METERING_EVENTS] {
            for partition in 0..self.partitions {
                let worker = ConsumerWorker::new(
                    self.bus.clone(),
                    groups::LEDGER_WRITER,
                    topic,
                    partition,
                    self.ledger_handler.clone() as Arc<dyn MessageHandler>,
                    ConsumerConfig::for_testing(),
                    self.clock.clone() as Arc<dyn Clock>,
                );
                loop {
                    let n = worker.run_once().await;
                    handled += n;
                    if n == 0 {
                        break;
                    }
                }
            }
        }
        handled
    }

    /// Drive the audit-logger group once over the decision topic.
    pub async fn drain_audit_group(&self) -> usize {
        let handler: Arc<dyn MessageHandler> = Arc::new(AuditLogHandler::new());
        let mut handled = 0;
        for partition in 0..self.partitions {
            let worker = ConsumerWorker::new(
                self.bus.clone(),
                groups::AUDIT_LOGGER,
                topics::POLICY_DECISIONS,
                partition,
                handler.clone(),
                ConsumerConfig::for_testing(),
                self.clock.clone() as Arc<dyn Clock>,
            );
            handled += worker.run_once().await;
        }
        handled
    }

    // --- ledger helpers ---------------------------------------------------

    pub fn partition_for(&self, principal: &PrincipalId) -> Partition {
        self.ledger.partition_for(principal)
    }

    /// All ledger events for a principal, every partition, ordered by time.
    pub fn ledger_events(&self, principal: &PrincipalId) -> Vec<LedgerEvent> {
        self.store
            .events_for_principal(principal, 0, i64::MAX)
            .expect("ledger query")
    }

    /// Ledger events of one type for a principal.
    pub fn events_of_type(
        &self,
        principal: &PrincipalId,
        event_type: EventType,
    ) -> Vec<LedgerEvent> {
        self.ledger_events(principal)
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Seal every pending leaf on every partition.
    pub fn seal_all(&self) {
        for aggregator in &self.aggregators {
            aggregator.catch_up().expect("catch up");
            aggregator.seal_all().expect("seal");
        }
    }

    /// Leaf hashes of a sealed batch, in id order.
    pub fn batch_leaves(&self, partition: Partition, batch_id: u64) -> Vec<Hash> {
        let batch = self.store.batch(partition, batch_id).expect("batch");
        self.store
            .events_in_range(partition, batch.first_event_id, batch.last_event_id)
            .expect("range")
            .iter()
            .map(|e| e.content_hash)
            .collect()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
