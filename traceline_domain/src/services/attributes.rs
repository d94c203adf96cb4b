// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Flattening
//!
//! Converts between nested JSON values and flat attribute maps with dotted
//! keys (`order.customer.tier`), the storage-boundary representation that
//! lets a columnar backend index individual properties. Array elements use
//! the index as a path segment (`tags.0`).
//!
//! Also hosts the span-hydration helpers built on the same path model:
//! output canonicalization for completion rows, internal-property filtering,
//! and stack-trace rewriting.

use serde_json::{Map, Value};

/// Content types whose output is preserved verbatim on completion instead of
/// being re-encoded as flattened JSON.
const PRESERVED_OUTPUT_TYPES: [&str; 2] = ["application/store", "text/plain"];

/// Prefix marking internal properties hidden from span presentation.
pub const INTERNAL_PROPERTY_PREFIX: &str = "$.";

/// Attribute key carrying the project directory used for stack-trace
/// rewriting.
pub const PROJECT_DIR_ATTRIBUTE: &str = "$.projectDir";

/// Flattens a JSON value into dotted-path attributes.
///
/// Scalars map to themselves under their path; empty objects and arrays
/// disappear (they carry no attribute data).
pub fn flatten_attributes(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
                flatten_into(child, path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{}.{}", prefix, index)
                };
                flatten_into(child, path, out);
            }
        }
        scalar => {
            if prefix.is_empty() {
                // A bare scalar has no path; store it under the empty key so
                // unflatten can restore it.
                out.insert(String::new(), scalar.clone());
            } else {
                out.insert(prefix, scalar.clone());
            }
        }
    }
}

/// Rebuilds a nested JSON object from dotted-path attributes.
///
/// Purely structural inverse of [`flatten_attributes`] for object trees;
/// numeric segments become object keys, not array indexes, because the flat
/// form does not distinguish the two.
pub fn unflatten_attributes(attributes: &Map<String, Value>) -> Value {
    if let Some(scalar) = attributes.get("") {
        return scalar.clone();
    }

    let mut root = Map::new();
    for (path, value) in attributes {
        let mut cursor = &mut root;
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            let entry = cursor
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            // A scalar already stored at an interior path is overwritten;
            // deepening wins so the operation stays total.
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            cursor = match entry {
                Value::Object(map) => map,
                _ => unreachable!("interior entry normalized to an object above"),
            };
        }
        if let Some(last) = segments.last() {
            cursor.insert(last.to_string(), value.clone());
        }
    }
    Value::Object(root)
}

/// Canonicalizes a completion output per its content type.
///
/// `application/store` and `text/plain` outputs pass through untouched; any
/// other type is re-encoded as a flattened attribute object.
pub fn canonicalize_output(output: &Value, output_type: Option<&str>) -> Value {
    match output_type {
        Some(t) if PRESERVED_OUTPUT_TYPES.contains(&t) => output.clone(),
        _ => Value::Object(flatten_attributes(output)),
    }
}

/// Strips internal (`$.`-prefixed) properties from a flattened property
/// object, leaving only what span presentation may show.
pub fn visible_properties(properties: &Value) -> Value {
    match properties {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !key.starts_with(INTERNAL_PROPERTY_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Rewrites a stack trace so that absolute paths under the project directory
/// become project-relative. Lines outside the project are untouched.
pub fn rewrite_stacktrace(stacktrace: &str, project_dir: &str) -> String {
    if project_dir.is_empty() {
        return stacktrace.to_string();
    }
    let trimmed = project_dir.trim_end_matches('/');
    let prefix = format!("{}/", trimmed);
    stacktrace
        .lines()
        .map(|line| line.replace(&prefix, ""))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_object() {
        let flat = flatten_attributes(&json!({
            "order": {"id": 7, "customer": {"tier": "gold"}},
            "ok": true
        }));
        assert_eq!(flat.get("order.id"), Some(&json!(7)));
        assert_eq!(flat.get("order.customer.tier"), Some(&json!("gold")));
        assert_eq!(flat.get("ok"), Some(&json!(true)));
    }

    #[test]
    fn test_flatten_arrays_by_index() {
        let flat = flatten_attributes(&json!({"tags": ["a", "b"]}));
        assert_eq!(flat.get("tags.0"), Some(&json!("a")));
        assert_eq!(flat.get("tags.1"), Some(&json!("b")));
    }

    #[test]
    fn test_unflatten_inverts_object_flatten() {
        let original = json!({"a": {"b": {"c": 1}}, "d": "x"});
        let rebuilt = unflatten_attributes(&flatten_attributes(&original));
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_scalar_round_trip() {
        let flat = flatten_attributes(&json!("just a string"));
        assert_eq!(unflatten_attributes(&flat), json!("just a string"));
    }

    #[test]
    fn test_canonicalize_preserves_store_and_plain_text() {
        let output = json!({"nested": {"x": 1}});
        assert_eq!(canonicalize_output(&output, Some("application/store")), output);
        assert_eq!(canonicalize_output(&json!("raw"), Some("text/plain")), json!("raw"));
    }

    #[test]
    fn test_canonicalize_flattens_other_types() {
        let output = json!({"nested": {"x": 1}});
        let canonical = canonicalize_output(&output, Some("application/json"));
        assert_eq!(canonical, json!({"nested.x": 1}));

        let untyped = canonicalize_output(&output, None);
        assert_eq!(untyped, json!({"nested.x": 1}));
    }

    #[test]
    fn test_visible_properties_hides_internal_keys() {
        let props = json!({
            "user.id": "u1",
            "$.projectDir": "/srv/app",
            "$.internal": true
        });
        assert_eq!(visible_properties(&props), json!({"user.id": "u1"}));
    }

    #[test]
    fn test_rewrite_stacktrace_strips_project_dir() {
        let stack = "Error: boom\n    at handler (/srv/app/src/tasks.ts:10:3)\n    at node:internal/x";
        let rewritten = rewrite_stacktrace(stack, "/srv/app");
        assert!(rewritten.contains("at handler (src/tasks.ts:10:3)"));
        assert!(rewritten.contains("node:internal/x"));
    }
}
