use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic hash of an input bundle for use as a cache key (§9 "Result
/// cache key"): canonical JSON with sorted keys and compact separators,
/// SHA-256 truncated to 16 hex chars.
pub fn hash_inputs(inputs: &Value) -> String {
    let canonical = canonicalize(inputs);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// `result:{execution_id}:{node_id}:{input_hash}` (§4.3 key schema).
pub fn generate_cache_key(execution_id: &str, node_id: &str, inputs: &Value) -> String {
    format!(
        "result:{execution_id}:{node_id}:{}",
        hash_inputs(inputs)
    )
}

/// Produces the same byte sequence as Python's
/// `json.dumps(x, sort_keys=True, separators=(",", ":"))` for the JSON
/// value subset we deal with (objects/arrays/scalars), so hashes computed
/// here agree with any pre-existing cache entries written by the source.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(hash_inputs(&a), hash_inputs(&b));
    }

    #[test]
    fn different_values_hash_differently() {
        assert_ne!(hash_inputs(&json!({"a": 1})), hash_inputs(&json!({"a": 2})));
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        assert_eq!(hash_inputs(&json!({"x": "y"})).len(), 16);
    }
}
