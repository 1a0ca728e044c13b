//! # Change Detection Hashing
//!
//! Content hashes over a canonical JSON rendering of source payloads.
//!
//! ## Canonical Form
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {"name": "Ann", "grade": 7.0, "meta": {"z": 1, "a": [true]}}           │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  {"grade":7,"meta":{"a":[true],"z":1},"name":"Ann"}                    │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  sha256 → lowercase hex (64 chars)                                     │
//! │                                                                         │
//! │  • object keys sorted lexicographically, at every depth                │
//! │  • integral floats rendered as integers (7.0 → 7)                      │
//! │  • no whitespace                                                       │
//! │  • array order preserved                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two payloads that differ only in key order, or in `7` vs `7.0`, hash the
//! same, so providers that reserialise records between pages never trigger
//! spurious updates.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::types::SourceData;

/// Largest float that still converts to an exact integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Renders source data in canonical JSON form.
pub fn canonical_json(data: &SourceData) -> String {
    let mut out = String::with_capacity(64);
    write_entries(data.iter(), &mut out);
    out
}

/// Renders any JSON value in canonical form.
pub fn canonical_value(value: &Value) -> String {
    let mut out = String::with_capacity(64);
    write_value(value, &mut out);
    out
}

/// SHA-256 of the canonical JSON, as lowercase hex.
pub fn content_hash(data: &SourceData) -> String {
    hex::encode(Sha256::digest(canonical_json(data).as_bytes()))
}

fn write_entries<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    let mut sorted: Vec<_> = entries.collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_value(value, out);
    }
    out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_entries(map.iter(), out),
    }
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&n.to_string());
        }
    } else {
        out.push_str(&n.to_string());
    }
}

fn write_string(s: &str, out: &mut String) {
    // Value's Display emits a compact, correctly escaped JSON string
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> SourceData {
        SourceData::from_value(value).unwrap()
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = data(json!({"first": "Ann", "last": "Lee", "meta": {"x": 1, "y": [1, 2]}}));
        let b = data(json!({"meta": {"y": [1, 2], "x": 1}, "last": "Lee", "first": "Ann"}));
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_integral_floats_normalised() {
        let a = data(json!({"grade": 7}));
        let b = data(json!({"grade": 7.0}));
        assert_eq!(canonical_json(&b), r#"{"grade":7}"#);
        assert_eq!(content_hash(&a), content_hash(&b));

        let c = data(json!({"gpa": 3.5}));
        assert_eq!(canonical_json(&c), r#"{"gpa":3.5}"#);
    }

    #[test]
    fn test_array_order_matters() {
        let a = data(json!({"tags": ["a", "b"]}));
        let b = data(json!({"tags": ["b", "a"]}));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_canonical_form_is_compact_and_escaped() {
        let d = data(json!({"b": null, "a": "say \"hi\"", "c": [true, false]}));
        assert_eq!(
            canonical_json(&d),
            r#"{"a":"say \"hi\"","b":null,"c":[true,false]}"#
        );
    }

    #[test]
    fn test_hash_shape() {
        let hash = content_hash(&SourceData::new());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // sha256("{}")
        assert_eq!(
            hash,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
