//! # Crypto Error Types

use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The public key bytes do not encode a valid curve point.
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// The private key bytes are not a valid scalar.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// The signature bytes are malformed.
    #[error("Invalid signature encoding")]
    InvalidSignature,

    /// The signature does not verify under the given key.
    #[error("Signature verification failed")]
    VerificationFailed,

    /// A signed payload contained a float or other non-canonical value.
    #[error("Payload is not canonicalizable: {reason}")]
    NotCanonical { reason: String },

    /// No key is registered for the requested principal.
    #[error("No signing key registered for principal {principal}")]
    UnknownKey { principal: String },
}
