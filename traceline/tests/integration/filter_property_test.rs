// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filter & Identifier Property Tests
//!
//! Property-based coverage of the filter evaluator and identifier
//! derivation: evaluation must not depend on key ordering or document
//! round-tripping, primitive equality must be exact, and deterministic span
//! ids must be stable.

use proptest::prelude::*;
use serde_json::{json, Value};

use traceline_domain::services::EventFilter;
use traceline_domain::value_objects::{SpanId, TraceId};

/// A small primitive JSON value.
fn primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

/// Key/primitive pairs with distinct keys.
fn document_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
    proptest::collection::btree_map("[a-z]{1,6}", primitive(), 1..5)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    /// Primitive equality: `eval([v], {k: v})` holds for every string,
    /// number, and boolean; a differing value fails.
    #[test]
    fn prop_primitive_equality(entries in document_entries()) {
        let document = Value::Object(entries.iter().cloned().collect());

        for (key, value) in &entries {
            let filter_doc = Value::Object(
                [(key.clone(), json!([value.clone()]))].into_iter().collect(),
            );
            let filter = EventFilter::from_value(&filter_doc).unwrap();
            prop_assert!(filter.evaluate(&document));

            let wrong_doc = Value::Object(
                [(key.clone(), json!(["__never__"]))].into_iter().collect(),
            );
            let wrong = EventFilter::from_value(&wrong_doc).unwrap();
            prop_assert!(!wrong.evaluate(&document));
        }
    }

    /// Evaluation survives a serialize/deserialize round trip of both the
    /// filter document and the event document (key order is irrelevant).
    #[test]
    fn prop_eval_invariant_under_round_trip(entries in document_entries()) {
        let document = Value::Object(entries.iter().cloned().collect());
        let filter_doc = Value::Object(
            entries.iter().map(|(k, v)| (k.clone(), json!([v]))).collect(),
        );

        let filter = EventFilter::from_value(&filter_doc).unwrap();
        let reparsed_doc: Value =
            serde_json::from_str(&serde_json::to_string(&document).unwrap()).unwrap();
        let reparsed_filter = EventFilter::from_value(
            &serde_json::from_str(&serde_json::to_string(&filter_doc).unwrap()).unwrap(),
        )
        .unwrap();

        prop_assert_eq!(filter.evaluate(&document), filter.evaluate(&reparsed_doc));
        prop_assert_eq!(filter.evaluate(&document), reparsed_filter.evaluate(&document));
        prop_assert!(filter.evaluate(&document));
    }

    /// Generated ids are well-formed and deterministic derivation is a
    /// function of `(traceId, seed)` alone.
    #[test]
    fn prop_span_id_derivation_is_stable(seed in "[ -~]{0,32}") {
        let trace = TraceId::generate();
        prop_assert_eq!(trace.as_str().len(), 32);

        let a = SpanId::derive(&trace, &seed);
        let b = SpanId::derive(&trace, &seed);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.as_str().len(), 16);
        prop_assert!(SpanId::from_string(a.as_str()).is_ok());
    }
}
