//! # Mandate Canonical Form
//!
//! The byte payload the issuer signs: canonical JSON over every immutable
//! field, with resources and actions sorted. Revocation state and the
//! signature itself are outside the payload; they change after signing.

use serde_json::json;
use warden_crypto::{canonical_json, CryptoError};
use warden_types::Mandate;

/// The canonical signing bytes for a mandate.
///
/// Deterministic: two mandates with the same field values yield identical
/// bytes regardless of how their scope collections were assembled.
pub fn mandate_signing_bytes(mandate: &Mandate) -> Result<Vec<u8>, CryptoError> {
    let mut resources: Vec<&str> = mandate.resources.iter().map(|p| p.as_str()).collect();
    resources.sort_unstable();
    // BTreeSet already iterates in sorted order.
    let actions: Vec<&String> = mandate.actions.iter().collect();

    let value = json!({
        "id": mandate.id.to_string(),
        "issuer": mandate.issuer.to_string(),
        "subject": mandate.subject.to_string(),
        "resources": resources,
        "actions": actions,
        "not_before_ms": mandate.not_before_ms,
        "not_after_ms": mandate.not_after_ms,
        "parent_mandate_id": mandate.parent_id.map(|p| p.to_string()),
        "depth": mandate.depth,
        "intent_hash": mandate.intent_hash.map(hex::encode),
        "created_ms": mandate.created_ms,
    });
    canonical_json(&value)
}
