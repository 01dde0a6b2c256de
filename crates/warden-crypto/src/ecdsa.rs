//! # ECDSA Signatures (P-256)
//!
//! Mandate and Merkle-root signatures use ECDSA over NIST P-256.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Constant-time scalar operations via the RustCrypto implementation
//! - Secret key material zeroized on drop

use crate::CryptoError;
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as P256Signature, SigningKey, VerifyingKey,
};
use warden_types::{PublicKeyBytes, SignatureBytes};
use zeroize::Zeroize;

/// Compressed P-256 public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Create from compressed SEC1 bytes (33 bytes, leading 0x02 or 0x03).
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Raw compressed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig =
            P256Signature::from_slice(&signature.0).map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl From<PublicKey> for PublicKeyBytes {
    fn from(k: PublicKey) -> PublicKeyBytes {
        PublicKeyBytes(k.0)
    }
}

impl TryFrom<&PublicKeyBytes> for PublicKey {
    type Error = CryptoError;

    fn try_from(bytes: &PublicKeyBytes) -> Result<Self, Self::Error> {
        PublicKey::from_bytes(bytes.0)
    }
}

/// ECDSA signature (64 bytes, `r || s`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Create from raw `r || s` bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl From<Signature> for SignatureBytes {
    fn from(s: Signature) -> SignatureBytes {
        SignatureBytes(s.0)
    }
}

impl From<&SignatureBytes> for Signature {
    fn from(bytes: &SignatureBytes) -> Signature {
        Signature(bytes.0)
    }
}

/// P-256 ECDSA keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret scalar bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// The public half (compressed, 33 bytes).
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        let sec1_bytes = verifying_key.to_sec1_bytes();
        // SEC1 compressed form is always exactly 33 bytes on P-256.
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1_bytes[..33]);
        PublicKey(bytes)
    }

    /// Sign a message (deterministic, RFC 6979).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: P256Signature = self.signing_key.sign(message);
        let bytes: [u8; 64] = sig.to_bytes().into();
        Signature(bytes)
    }

    /// Secret scalar bytes (for sealed storage).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}
