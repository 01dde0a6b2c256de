//! # Key Registry
//!
//! Signing keys are held behind a registry handle passed in at
//! construction; no component reads key material directly. The registry
//! signs on behalf of a principal so secrets never cross an API boundary.

use crate::ecdsa::{Keypair, PublicKey, Signature};
use crate::CryptoError;
use parking_lot::RwLock;
use std::collections::HashMap;
use warden_types::PrincipalId;

/// Access to principals' signing keys.
pub trait KeyRegistry: Send + Sync {
    /// Sign `payload` with the principal's key.
    fn sign_for(&self, principal: &PrincipalId, payload: &[u8]) -> Result<Signature, CryptoError>;

    /// The principal's public key.
    fn public_key(&self, principal: &PrincipalId) -> Result<PublicKey, CryptoError>;
}

/// In-memory registry for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryKeyRegistry {
    keys: RwLock<HashMap<PrincipalId, Keypair>>,
}

impl InMemoryKeyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a keypair for a principal, replacing any prior key.
    pub fn register(&self, principal: PrincipalId, keypair: Keypair) {
        self.keys.write().insert(principal, keypair);
    }

    /// Generate and register a fresh keypair, returning the public half.
    pub fn generate_for(&self, principal: PrincipalId) -> PublicKey {
        let keypair = Keypair::generate();
        let public = keypair.public_key();
        self.keys.write().insert(principal, keypair);
        public
    }
}

impl KeyRegistry for InMemoryKeyRegistry {
    fn sign_for(&self, principal: &PrincipalId, payload: &[u8]) -> Result<Signature, CryptoError> {
        let keys = self.keys.read();
        let keypair = keys.get(principal).ok_or_else(|| CryptoError::UnknownKey {
            principal: principal.to_string(),
        })?;
        Ok(keypair.sign(payload))
    }

    fn public_key(&self, principal: &PrincipalId) -> Result<PublicKey, CryptoError> {
        let keys = self.keys.read();
        let keypair = keys.get(principal).ok_or_else(|| CryptoError::UnknownKey {
            principal: principal.to_string(),
        })?;
        Ok(keypair.public_key())
    }
}
