//! # Warden Spend
//!
//! The budget read path: a read-mostly pricebook mapping resource types to
//! unit costs, and a TTL-bounded spending cache holding running totals,
//! the last 24 hours of priced events, and bucketed trend sums.
//!
//! The cache is authoritative only for its window; anything older falls
//! through to the persistence layer, and a window that straddles the
//! boundary is split there and summed, never overlapped.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod cache;
pub mod pricebook;

pub use cache::{
    CurrencyTotals, SpendConfig, SpendingCache, SpendingHistory, StoreHistory, TrendWindow,
};
pub use pricebook::{JsonPriceSource, Price, Pricebook, PricebookError, PriceSource};
