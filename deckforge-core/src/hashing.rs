//! Hashing System - SHA-256 for Tasks and Artifacts
//!
//! A task's `job_hash` identifies its inputs; `artifact_hash` identifies
//! the bytes it produced. Both are stable across runs and processes.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serialize with object keys sorted at every level and no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonicalize(serde_json::to_value(value)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// `sha256(template_id ":" canonical(mappings) ":" engine_version)`
///
/// Mapping order is part of the hash: it decides which write wins.
pub fn compute_job_hash(
    template_id: &str,
    mappings: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    for (i, field) in [template_id, canonical_json(mappings)?.as_str(), engine_version].iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(field.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash of a produced artifact's bytes.
pub fn compute_artifact_hash(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

mod hex {
    use std::fmt::Write as _;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(out, "{:02x}", b);
        }
        out
    }
}
