//! # Warden Crypto
//!
//! Signing, hashing, and canonical serialization primitives.
//!
//! ## Security Properties
//!
//! - ECDSA over NIST P-256 with RFC 6979 deterministic nonces: signing the
//!   same payload twice yields byte-identical signatures, so signatures can
//!   be deduplicated and asserted exactly in tests.
//! - SHA-256 for every digest (event content hashes, Merkle nodes, intent
//!   binding).
//! - Canonical JSON for signed payloads: lexicographically sorted keys, no
//!   insignificant whitespace, integers only. Floats are rejected outright:
//!   costs are fixed-point minor units and timestamps are milliseconds.
//! - Secret key material is zeroized on drop.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod canonical;
pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod registry;

pub use canonical::canonical_json;
pub use ecdsa::{Keypair, PublicKey, Signature};
pub use errors::CryptoError;
pub use hashing::{sha256, sha256_concat, Sha256Hasher};
pub use registry::{InMemoryKeyRegistry, KeyRegistry};
