//! # Service Container
//!
//! Constructs every component with explicit dependency injection and owns
//! the background tasks: one aggregator per partition and one consumer
//! per `(group, topic, partition)`.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_bus::{topics, InMemoryBus, StoredMessage};
use warden_crypto::{InMemoryKeyRegistry, Keypair, PublicKey};
use warden_evaluator::Evaluator;
use warden_ledger::{
    KeypairBatchSigner, LedgerRouter, LedgerWriter, MerkleAggregator, SpendingRecorder,
};
use warden_mandates::MandateManager;
use warden_pipeline::{
    groups, AuditLogHandler, ConsumerWorker, HandlerError, LedgerWriteHandler, MessageHandler,
    MetricsHandler, Replayer,
};
use warden_spend::{JsonPriceSource, Pricebook, SpendingCache, StoreHistory};
use warden_store::{Clock, FileStore, MemoryStore, PartitionLock, Store, SystemClock};
use warden_types::{BusEnvelope, ChangeNotice};

/// Signing key id for Merkle roots.
const LEDGER_KEY_ID: &str = "ledger-key-1";

/// Applies `policy.changes` notices to the evaluator caches.
struct ChangeNoticeHandler {
    evaluator: Arc<Evaluator>,
}

#[async_trait]
impl MessageHandler for ChangeNoticeHandler {
    async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError> {
        let envelope: BusEnvelope<ChangeNotice> =
            serde_json::from_value(message.payload.clone()).map_err(HandlerError::new)?;
        envelope.validate_version().map_err(HandlerError::new)?;
        self.evaluator.apply_change(&envelope.payload);
        Ok(())
    }
}

/// The assembled service.
pub struct Node {
    config: NodeConfig,
    /// Shared handles, public for embedding and tests.
    pub store: Arc<dyn Store>,
    pub bus: Arc<InMemoryBus>,
    pub ledger: Arc<LedgerRouter>,
    pub evaluator: Arc<Evaluator>,
    pub manager: Arc<MandateManager>,
    pub spending: Arc<SpendingCache>,
    pub pricebook: Arc<Pricebook>,
    pub key_registry: Arc<InMemoryKeyRegistry>,
    pub history: Arc<StoreHistory>,
    pub replayer: Arc<Replayer>,
    /// Public key for verifying sealed roots, keyed by signing key id.
    pub verification_keys: HashMap<String, PublicKey>,
    aggregators: Vec<(Arc<MerkleAggregator>, mpsc::UnboundedReceiver<warden_ledger::LeafNotice>)>,
    workers: Vec<ConsumerWorker>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build the full component graph. Nothing runs yet; call
    /// [`Node::start`].
    pub fn build(config: NodeConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn Store> = if config.ephemeral {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(
                FileStore::open(config.store_path())
                    .with_context(|| format!("opening store at {:?}", config.store_path()))?,
            )
        };

        let bus = Arc::new(InMemoryBus::new(config.partitions));
        let spending = Arc::new(SpendingCache::new(config.spend_config(), clock.clone()));
        let history = Arc::new(StoreHistory::new(store.clone()));

        let pricebook = Arc::new(Pricebook::empty());
        if let Some(path) = &config.pricebook_path {
            pricebook
                .reload_from(&JsonPriceSource::new(path))
                .with_context(|| format!("loading pricebook from {path:?}"))?;
        }

        // Production deployments load this from sealed storage; a fresh
        // key per process still verifies everything sealed by it.
        let signer = Arc::new(KeypairBatchSigner::new(LEDGER_KEY_ID, Keypair::generate()));
        let verification_keys =
            HashMap::from([(LEDGER_KEY_ID.to_string(), signer.public_key())]);

        // One writer + aggregator per partition; the advisory lock pins
        // single-writer discipline for durable stores.
        let mut writers = Vec::with_capacity(config.partitions as usize);
        let mut aggregators = Vec::with_capacity(config.partitions as usize);
        for partition in 0..config.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            let writer = if config.ephemeral {
                LedgerWriter::new(store.clone(), partition)
            } else {
                let lock = PartitionLock::acquire(&config.data_dir, partition)
                    .with_context(|| format!("locking partition {partition}"))?;
                LedgerWriter::with_lock(store.clone(), partition, lock)
            }
            .with_spending(spending.clone() as Arc<dyn SpendingRecorder>)
            .with_aggregator(tx);
            writers.push(Arc::new(writer));

            let aggregator = Arc::new(MerkleAggregator::new(
                store.clone(),
                partition,
                signer.clone(),
                clock.clone(),
                config.aggregator_config(),
            ));
            aggregators.push((aggregator, rx));
        }
        let ledger = Arc::new(LedgerRouter::new(writers, config.partitions));

        let key_registry = Arc::new(InMemoryKeyRegistry::new());
        let manager = Arc::new(
            MandateManager::new(
                store.clone(),
                ledger.clone(),
                key_registry.clone(),
                clock.clone(),
            )
            .with_bus(bus.clone()),
        );
        let evaluator = Arc::new(
            Evaluator::new(store.clone(), clock.clone(), config.evaluator_config())
                .with_bus(bus.clone()),
        );

        let ledger_handler = Arc::new(LedgerWriteHandler::new(ledger.clone(), pricebook.clone()));
        let replayer = Arc::new(Replayer::new(
            store.clone(),
            bus.clone(),
            ledger_handler.clone(),
            spending.clone(),
            clock.clone(),
        ));

        // Consumer workers: sequential within a partition, parallel across.
        let mut workers = Vec::new();
        let metrics_handler: Arc<dyn MessageHandler> = Arc::new(MetricsHandler::new(clock.clone()));
        let audit_handler: Arc<dyn MessageHandler> = Arc::new(AuditLogHandler::new());
        let change_handler: Arc<dyn MessageHandler> = Arc::new(ChangeNoticeHandler {
            evaluator: evaluator.clone(),
        });
        for partition in 0..config.partitions {
            for topic in [topics::METERING_EVENTS, topics::POLICY_DECISIONS] {
                workers.push(ConsumerWorker::new(
                    bus.clone(),
                    groups::LEDGER_WRITER,
                    topic,
                    partition,
                    ledger_handler.clone() as Arc<dyn MessageHandler>,
                    config.consumer_config(),
                    clock.clone(),
                ));
                workers.push(ConsumerWorker::new(
                    bus.clone(),
                    groups::AGGREGATOR_METRICS,
                    topic,
                    partition,
                    metrics_handler.clone(),
                    config.consumer_config(),
                    clock.clone(),
                ));
                workers.push(ConsumerWorker::new(
                    bus.clone(),
                    groups::AUDIT_LOGGER,
                    topic,
                    partition,
                    audit_handler.clone(),
                    config.consumer_config(),
                    clock.clone(),
                ));
            }
            workers.push(ConsumerWorker::new(
                bus.clone(),
                "evaluator-cache",
                topics::POLICY_CHANGES,
                partition,
                change_handler.clone(),
                config.consumer_config(),
                clock.clone(),
            ));
        }

        let (shutdown_tx, _) = watch::channel(false);

        info!(
            partitions = config.partitions,
            ephemeral = config.ephemeral,
            "Node built"
        );
        Ok(Self {
            config,
            store,
            bus,
            ledger,
            evaluator,
            manager,
            spending,
            pricebook,
            key_registry,
            history,
            replayer,
            verification_keys,
            aggregators,
            workers,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Spawn aggregator loops and consumer workers.
    pub fn start(&mut self) {
        for (aggregator, rx) in self.aggregators.drain(..) {
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(aggregator.run(rx, shutdown)));
        }
        for worker in self.workers.drain(..) {
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(Arc::new(worker).run(shutdown)));
        }
        info!(tasks = self.tasks.len(), "Node started");
    }

    /// Stop consumers and aggregators, flushing unsealed batches.
    pub async fn shutdown(mut self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("No running tasks observed the shutdown signal");
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Node stopped");
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
