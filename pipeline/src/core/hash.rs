//! Deterministic content hashing over canonical JSON.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters of the content hash that appear in directory names.
pub const SHORT_HASH_LEN: usize = 12;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the compact canonical serialization of `value`.
pub fn content_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..SHORT_HASH_LEN.min(hash.len())]
}

/// Compact JSON with object keys sorted at every level.
///
/// Independent of whether `serde_json` preserves insertion order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
