//! # Pricebook
//!
//! Read-mostly map from resource type to unit cost. Reloads replace the
//! whole map atomically; readers never observe a partial update.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use warden_types::{Cost, Currency};

/// Errors from pricing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricebookError {
    /// No price is listed for the resource type.
    #[error("Unknown resource type {resource_type:?}")]
    UnknownResource { resource_type: String },

    /// `unit_cost * quantity` overflowed.
    #[error("Cost overflow for {resource_type:?} quantity {quantity}")]
    Overflow {
        resource_type: String,
        quantity: u64,
    },

    /// The price source could not be read or parsed.
    #[error("Price source unreadable: {message}")]
    SourceUnreadable { message: String },
}

/// Unit price of one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Cost per unit, in minor units.
    pub unit_cost_minor: i64,
    /// Currency of the unit cost.
    pub currency: Currency,
}

/// Read-mostly price map with atomic reload.
pub struct Pricebook {
    inner: RwLock<Arc<HashMap<String, Price>>>,
}

impl Pricebook {
    /// Build from initial entries.
    #[must_use]
    pub fn new(entries: HashMap<String, Price>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(entries)),
        }
    }

    /// An empty book; every lookup fails until a reload.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Price a quantity of a resource type.
    pub fn price(&self, resource_type: &str, quantity: u64) -> Result<Cost, PricebookError> {
        let book = Arc::clone(&self.inner.read());
        let price = book
            .get(resource_type)
            .ok_or_else(|| PricebookError::UnknownResource {
                resource_type: resource_type.to_string(),
            })?;
        let quantity_i64 =
            i64::try_from(quantity).map_err(|_| PricebookError::Overflow {
                resource_type: resource_type.to_string(),
                quantity,
            })?;
        let minor_units = price
            .unit_cost_minor
            .checked_mul(quantity_i64)
            .ok_or_else(|| PricebookError::Overflow {
                resource_type: resource_type.to_string(),
                quantity,
            })?;
        Ok(Cost {
            minor_units,
            currency: price.currency,
        })
    }

    /// Replace the whole map. Readers see either the old or the new book,
    /// never a mixture.
    pub fn reload(&self, entries: HashMap<String, Price>) {
        let count = entries.len();
        *self.inner.write() = Arc::new(entries);
        info!(entries = count, "Pricebook reloaded");
    }

    /// Reload from a source, replacing the map only on a full parse.
    pub fn reload_from(&self, source: &dyn PriceSource) -> Result<(), PricebookError> {
        let entries = source.load()?;
        self.reload(entries);
        Ok(())
    }

    /// Number of listed resource types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the book has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Where price entries come from.
pub trait PriceSource: Send + Sync {
    /// Load the full entry set.
    fn load(&self) -> Result<HashMap<String, Price>, PricebookError>;
}

/// Price entries from a JSON file of the form
/// `{"api:openai:gpt-4": {"unit_cost_minor": 3, "currency": "USD"}, …}`.
pub struct JsonPriceSource {
    path: std::path::PathBuf,
}

impl JsonPriceSource {
    /// Source backed by the given file.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PriceSource for JsonPriceSource {
    fn load(&self) -> Result<HashMap<String, Price>, PricebookError> {
        let bytes = std::fs::read(&self.path).map_err(|e| PricebookError::SourceUnreadable {
            message: format!("{}: {e}", self.path.display()),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| PricebookError::SourceUnreadable {
            message: format!("{}: {e}", self.path.display()),
        })
    }
}
