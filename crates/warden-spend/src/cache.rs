//! # Spending Cache
//!
//! Fast running totals and a time-ordered event window per principal.
//!
//! The cache holds the last 24 hours (sliding) of priced events and is the
//! authority for that window only. Older data is read from the store.
//! `sum_spending` over a straddling range splits at the window boundary:
//! the store side covers `[t0, boundary)`, the cache side `[boundary, t1]`,
//! and the halves are added, never overlapped.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use warden_ledger::{RecordError, SpendingRecorder};
use warden_store::{Clock, Store};
use warden_types::{
    Cost, Currency, EventId, EventType, LedgerEvent, PrincipalId, StoreError, TimestampMs,
};

/// Per-currency sums in minor units.
pub type CurrencyTotals = BTreeMap<Currency, i64>;

/// Trend bucket granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendWindow {
    /// 1-hour buckets.
    Hourly,
    /// 1-day buckets.
    Daily,
    /// 7-day buckets.
    Weekly,
}

impl TrendWindow {
    /// Bucket width in milliseconds.
    #[must_use]
    pub fn bucket_ms(&self) -> i64 {
        match self {
            TrendWindow::Hourly => 60 * 60 * 1000,
            TrendWindow::Daily => 24 * 60 * 60 * 1000,
            TrendWindow::Weekly => 7 * 24 * 60 * 60 * 1000,
        }
    }

    /// The bucket start for a timestamp.
    #[must_use]
    pub fn bucket_start(&self, ts_ms: TimestampMs) -> TimestampMs {
        ts_ms - ts_ms.rem_euclid(self.bucket_ms())
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct SpendConfig {
    /// Width of the authoritative window (also the sliding entry TTL).
    pub window_ms: i64,
}

impl Default for SpendConfig {
    fn default() -> Self {
        Self {
            window_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Default)]
struct Entry {
    /// Running totals over everything recorded for the principal.
    totals: CurrencyTotals,
    /// Events inside the window, ordered by `(ts, event_id)`.
    events: BTreeMap<(TimestampMs, EventId), Cost>,
    /// Bucketed sums per granularity.
    trends: HashMap<TrendWindow, BTreeMap<TimestampMs, CurrencyTotals>>,
    /// Sliding TTL anchor.
    last_touched_ms: TimestampMs,
}

impl Entry {
    fn add(&mut self, ts_ms: TimestampMs, event_id: EventId, cost: Cost, now_ms: TimestampMs) {
        *self.totals.entry(cost.currency).or_insert(0) += cost.minor_units;
        self.events.insert((ts_ms, event_id), cost);
        for window in [TrendWindow::Hourly, TrendWindow::Daily, TrendWindow::Weekly] {
            let bucket = window.bucket_start(ts_ms);
            let totals = self
                .trends
                .entry(window)
                .or_default()
                .entry(bucket)
                .or_default();
            *totals.entry(cost.currency).or_insert(0) += cost.minor_units;
        }
        self.last_touched_ms = now_ms;
    }

    fn evict_before(&mut self, boundary_ms: TimestampMs) {
        self.events = self.events.split_off(&(boundary_ms, 0));
        for (window, buckets) in &mut self.trends {
            // A bucket is dropped once it ends before the boundary.
            buckets.retain(|start, _| *start + window.bucket_ms() > boundary_ms);
        }
    }

    fn sum_between(&self, t0: TimestampMs, t1: TimestampMs) -> CurrencyTotals {
        let mut sums = CurrencyTotals::new();
        for ((_, _), cost) in self.events.range((t0, 0)..=(t1, EventId::MAX)) {
            *sums.entry(cost.currency).or_insert(0) += cost.minor_units;
        }
        sums
    }
}

/// TTL-bounded spending cache.
pub struct SpendingCache {
    entries: RwLock<HashMap<PrincipalId, Entry>>,
    config: SpendConfig,
    clock: Arc<dyn Clock>,
}

impl SpendingCache {
    /// Create a cache.
    #[must_use]
    pub fn new(config: SpendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Record a priced event. Called best-effort by the ledger writer and
    /// during replay.
    pub fn record(&self, principal: PrincipalId, ts_ms: TimestampMs, event_id: EventId, cost: Cost) {
        let now = self.clock.now_ms();
        let boundary = now - self.config.window_ms;
        let mut entries = self.entries.write();
        let entry = entries.entry(principal).or_default();
        entry.add(ts_ms, event_id, cost, now);
        entry.evict_before(boundary);
    }

    /// Running totals for a principal, if cached.
    #[must_use]
    pub fn total_spent(&self, principal: &PrincipalId) -> Option<CurrencyTotals> {
        self.entries.read().get(principal).map(|e| e.totals.clone())
    }

    /// The cached event window for a principal, oldest first.
    #[must_use]
    pub fn recent_events(&self, principal: &PrincipalId) -> Vec<(TimestampMs, EventId, Cost)> {
        self.entries
            .read()
            .get(principal)
            .map(|e| {
                e.events
                    .iter()
                    .map(|((ts, id), cost)| (*ts, *id, *cost))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bucketed sums for one granularity.
    #[must_use]
    pub fn trend(
        &self,
        principal: &PrincipalId,
        window: TrendWindow,
    ) -> BTreeMap<TimestampMs, CurrencyTotals> {
        self.entries
            .read()
            .get(principal)
            .and_then(|e| e.trends.get(&window).cloned())
            .unwrap_or_default()
    }

    /// Drop entries whose sliding TTL expired.
    pub fn gc(&self) {
        let now = self.clock.now_ms();
        let ttl = self.config.window_ms;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now - e.last_touched_ms < ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Spending cache entries expired");
        }
    }

    /// Sum a principal's spending over `[t0, t1]`, combining the cache and
    /// the authoritative store.
    pub fn sum_spending(
        &self,
        history: &dyn SpendingHistory,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Result<CurrencyTotals, StoreError> {
        if t1 < t0 {
            return Ok(CurrencyTotals::new());
        }
        let boundary = self.clock.now_ms() - self.config.window_ms;
        let cached = {
            let entries = self.entries.read();
            entries.get(principal).map(|e| {
                let from = t0.max(boundary);
                e.sum_between(from, t1)
            })
        };

        match cached {
            // Fully inside the window and cached: the cache is the
            // authority.
            Some(sums) if t0 >= boundary => Ok(sums),
            // Straddling: store for [t0, boundary), cache for the rest.
            Some(sums) if t1 >= boundary => {
                let older = history.costs_between(principal, t0, boundary - 1)?;
                Ok(merge(sums, older))
            }
            // Entirely before the window, or nothing cached at all: the
            // store answers alone.
            _ => {
                let mut sums = CurrencyTotals::new();
                for cost in history.costs_between(principal, t0, t1)? {
                    *sums.entry(cost.currency).or_insert(0) += cost.minor_units;
                }
                Ok(sums)
            }
        }
    }
}

fn merge(mut sums: CurrencyTotals, costs: Vec<Cost>) -> CurrencyTotals {
    for cost in costs {
        *sums.entry(cost.currency).or_insert(0) += cost.minor_units;
    }
    sums
}

impl SpendingRecorder for SpendingCache {
    fn record(&self, event: &LedgerEvent) -> Result<(), RecordError> {
        let cost = event.cost.ok_or_else(|| RecordError {
            message: format!("event {} carries no cost", event.id),
        })?;
        SpendingCache::record(self, event.principal_id, event.ts_ms, event.id, cost);
        Ok(())
    }
}

/// The authoritative side of `sum_spending`.
pub trait SpendingHistory: Send + Sync {
    /// Costs of metering events for a principal in `[t0, t1]`.
    fn costs_between(
        &self,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Result<Vec<Cost>, StoreError>;
}

/// [`SpendingHistory`] over the persistence layer.
pub struct StoreHistory {
    store: Arc<dyn Store>,
}

impl StoreHistory {
    /// Wrap a store handle.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl SpendingHistory for StoreHistory {
    fn costs_between(
        &self,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Result<Vec<Cost>, StoreError> {
        Ok(self
            .store
            .events_for_principal(principal, t0, t1)?
            .into_iter()
            .filter(|e| e.event_type == EventType::Metering)
            .filter_map(|e| e.cost)
            .collect())
    }
}
