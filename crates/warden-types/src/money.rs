//! # Money
//!
//! Costs are fixed-point integers in minor units (e.g. cents) with an
//! explicit ISO-4217 currency code. Floats never appear in signed payloads
//! or on the ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::str::FromStr;

/// Errors from currency parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    /// Currency codes are exactly three ASCII uppercase letters.
    #[error("Invalid currency code {code:?}")]
    InvalidCode { code: String },
}

/// Three-letter ISO-4217 currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    /// United States dollar.
    pub const USD: Currency = Currency(*b"USD");

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII uppercase.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(CurrencyError::InvalidCode {
                code: s.to_string(),
            });
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> String {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cost in minor units of one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    /// Amount in minor units (cents for USD).
    pub minor_units: i64,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Cost {
    /// A zero cost in the given currency.
    #[must_use]
    pub fn zero(currency: Currency) -> Self {
        Cost {
            minor_units: 0,
            currency,
        }
    }

    /// Checked addition; `None` on overflow or currency mismatch.
    #[must_use]
    pub fn checked_add(&self, other: &Cost) -> Option<Cost> {
        if self.currency != other.currency {
            return None;
        }
        Some(Cost {
            minor_units: self.minor_units.checked_add(other.minor_units)?,
            currency: self.currency,
        })
    }
}

impl std::fmt::Display for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.minor_units, self.currency)
    }
}
