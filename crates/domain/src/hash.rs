//! Canonical JSON hashing.
//!
//! Cache keys and access-scope fingerprints must be stable across processes
//! and independent of map iteration order, so JSON values are serialized
//! with recursively sorted object keys before hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value canonically: object keys sorted at every level,
/// arrays kept in order, no insignificant whitespace.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hex-encoded SHA-256 digest of the input.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Canonical hash of a JSON value — `sha256_hex(canonical_string(value))`.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(&canonical_string(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn nested_objects_are_sorted() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": [3, {"y": 1, "x": 2}]});
        assert_eq!(
            canonical_string(&v),
            r#"{"a":[3,{"x":2,"y":1}],"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(canonical_string(&json!(null)), "null");
        assert_eq!(canonical_string(&json!(true)), "true");
        assert_eq!(canonical_string(&json!("x")), "\"x\"");
        assert_eq!(canonical_string(&json!(42)), "42");
    }

    #[test]
    fn sha256_is_hex_and_fixed_length() {
        let h = sha256_hex("maestro");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_values_different_hashes() {
        assert_ne!(hash_value(&json!({"x": 1})), hash_value(&json!({"x": 2})));
    }
}
