//! Bounded serialization of arbitrary payloads.
//!
//! The store must never receive an unbounded document. Before insertion,
//! `inputs`/`outputs` payloads pass through [`bound_payload`], which
//! enforces four limits:
//!
//! 1. overall serialized size ≤ [`MAX_SERIALIZED_BYTES`] — otherwise the
//!    whole payload is replaced by `{"truncated": true, "original_size": N}`;
//! 2. nesting depth ≤ [`MAX_DEPTH`] — deeper values become
//!    `{"truncated": true, "type": ...}` stubs;
//! 3. at most [`MAX_LIST_ELEMENTS`] list elements and [`MAX_MAP_ENTRIES`]
//!    map entries per level;
//! 4. strings longer than [`MAX_STRING_CHARS`] characters are elided with
//!    a trailing ellipsis.

use serde_json::{json, Map, Value};

pub const MAX_SERIALIZED_BYTES: usize = 10_000;
pub const MAX_DEPTH: usize = 5;
pub const MAX_LIST_ELEMENTS: usize = 100;
pub const MAX_MAP_ENTRIES: usize = 50;
pub const MAX_STRING_CHARS: usize = 500;

/// Bound one payload for storage.
pub fn bound_payload(value: &Value) -> Value {
    let original_size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
    if original_size > MAX_SERIALIZED_BYTES {
        return json!({ "truncated": true, "original_size": original_size });
    }
    bound_value(value, MAX_DEPTH)
}

/// Serialized byte length of a payload, reported alongside it.
pub fn payload_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

fn bound_value(value: &Value, depth: usize) -> Value {
    if depth == 0 {
        return json!({ "truncated": true, "type": type_name(value) });
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(s) => Value::String(elide(s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_LIST_ELEMENTS)
                .map(|v| bound_value(v, depth - 1))
                .collect(),
        ),
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, v) in entries.iter().take(MAX_MAP_ENTRIES) {
                out.insert(key.clone(), bound_value(v, depth - 1));
            }
            Value::Object(out)
        }
    }
}

fn elide(s: &str) -> String {
    if s.chars().count() > MAX_STRING_CHARS {
        let mut out: String = s.chars().take(MAX_STRING_CHARS).collect();
        out.push_str("...");
        out
    } else {
        s.to_string()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_passes_through() {
        let v = json!({ "msg": "hi", "n": 3, "ok": true, "none": null });
        assert_eq!(bound_payload(&v), v);
    }

    #[test]
    fn oversized_payload_becomes_size_stub() {
        let big = "x".repeat(50 * 1024);
        let v = json!({ "blob": big });
        let bounded = bound_payload(&v);
        assert_eq!(bounded["truncated"], true);
        let reported = bounded["original_size"].as_u64().unwrap() as usize;
        // The raw string plus JSON quoting and the field name.
        assert!(reported >= 50 * 1024);
        assert!(reported < 50 * 1024 + 64);
    }

    #[test]
    fn long_string_is_elided() {
        let v = json!({ "s": "a".repeat(600) });
        let bounded = bound_payload(&v);
        let s = bounded["s"].as_str().unwrap();
        assert_eq!(s.len(), MAX_STRING_CHARS + 3);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn elision_respects_char_boundaries() {
        let v = json!("é".repeat(501));
        let bounded = bound_payload(&v);
        let s = bounded.as_str().unwrap();
        assert_eq!(s.chars().count(), MAX_STRING_CHARS + 3);
    }

    #[test]
    fn deep_nesting_is_stubbed() {
        let mut v = json!("leaf");
        for _ in 0..8 {
            v = json!({ "inner": v });
        }
        let bounded = bound_payload(&v);
        // Walk down to the truncation stub.
        let mut cursor = &bounded;
        let mut levels = 0;
        while let Some(inner) = cursor.get("inner") {
            cursor = inner;
            levels += 1;
        }
        assert!(levels < 8);
        assert_eq!(cursor["truncated"], true);
        assert_eq!(cursor["type"], "map");
    }

    #[test]
    fn wide_list_is_cut_at_limit() {
        let v = json!({ "items": (0..250).collect::<Vec<i32>>() });
        let bounded = bound_payload(&v);
        assert_eq!(bounded["items"].as_array().unwrap().len(), MAX_LIST_ELEMENTS);
    }

    #[test]
    fn wide_map_is_cut_at_limit() {
        let mut entries = Map::new();
        for i in 0..80 {
            entries.insert(format!("k{i:03}"), json!(i));
        }
        let bounded = bound_payload(&Value::Object(entries));
        assert_eq!(bounded.as_object().unwrap().len(), MAX_MAP_ENTRIES);
    }

    #[test]
    fn bounded_output_is_always_under_overall_limit() {
        // 99 strings of 120 chars is under 10k only after bounding would
        // not kick in — build something just under the overall limit and
        // make sure bounding is idempotent on it.
        let v = json!({ "s": "y".repeat(400), "list": (0..50).collect::<Vec<i32>>() });
        let once = bound_payload(&v);
        let twice = bound_payload(&once);
        assert_eq!(once, twice);
        assert!(payload_size(&once) <= MAX_SERIALIZED_BYTES);
    }
}
