//! # Ledger Ports
//!
//! Dependencies the ledger requires its host to provide: a signer for
//! batch roots and a best-effort sink for spending updates.

use thiserror::Error;
use warden_crypto::{CryptoError, Keypair, Signature};
use warden_types::{Hash, LedgerEvent};

/// Failure to record a spending update. The writer logs these and moves on;
/// the cache is repopulated from the ledger on the next query anyway.
#[derive(Debug, Clone, Error)]
#[error("Spending record failed: {message}")]
pub struct RecordError {
    /// What went wrong.
    pub message: String,
}

/// Best-effort sink for spending updates after a successful append.
pub trait SpendingRecorder: Send + Sync {
    /// Record the cost carried by a freshly appended event.
    fn record(&self, event: &LedgerEvent) -> Result<(), RecordError>;
}

/// Signs Merkle batch commitments.
pub trait BatchSigner: Send + Sync {
    /// Identifier of the signing key, stored alongside each batch.
    fn key_id(&self) -> &str;

    /// Sign a batch commitment.
    fn sign(&self, commitment: &Hash) -> Result<Signature, CryptoError>;
}

/// A [`BatchSigner`] over a locally held keypair.
pub struct KeypairBatchSigner {
    key_id: String,
    keypair: Keypair,
}

impl KeypairBatchSigner {
    /// Wrap a keypair under a stable key id.
    #[must_use]
    pub fn new(key_id: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            key_id: key_id.into(),
            keypair,
        }
    }

    /// The public half, for verification.
    #[must_use]
    pub fn public_key(&self) -> warden_crypto::PublicKey {
        self.keypair.public_key()
    }
}

impl BatchSigner for KeypairBatchSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, commitment: &Hash) -> Result<Signature, CryptoError> {
        Ok(self.keypair.sign(commitment))
    }
}
