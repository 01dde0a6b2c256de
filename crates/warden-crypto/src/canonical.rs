//! # Canonical JSON
//!
//! Deterministic serialization for signed payloads and content hashes.
//!
//! Rules:
//!
//! - Object keys are emitted in lexicographic (byte) order, recursively.
//! - No insignificant whitespace.
//! - Numbers must be integers. Floats are rejected: money is fixed-point
//!   minor units and time is integer milliseconds, so a float in a signed
//!   payload is always a bug.
//! - Strings use the standard JSON escape rules.
//!
//! Two syntactically different inputs denoting the same value (key order,
//! whitespace) canonicalize to identical bytes.

use crate::CryptoError;
use serde_json::Value;

/// Serialize a JSON value to canonical bytes.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CryptoError::NotCanonical {
                    reason: format!("float {n} in signed payload"),
                });
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                // Key came from the map, so the value exists.
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json's escaping is already deterministic.
    let escaped = serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
    out.extend_from_slice(escaped.as_bytes());
}
