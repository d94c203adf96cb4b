// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Filter Evaluator
//!
//! Evaluates a declarative event-filter expression against a JSON document.
//! A filter maps paths to matchers, recursively nested; the document matches
//! iff every leaf matcher matches.
//!
//! ## Composition Rules
//!
//! - At each object level, *all* keys must match (logical AND).
//! - A matcher list is disjunctive: any one matcher matching suffices.
//! - A missing path fails unless a matcher is `{$exists: false}` or
//!   `{$isNull: true}`.
//!
//! ## Matcher Kinds
//!
//! | Matcher | Semantics |
//! |---------|-----------|
//! | primitive `v` | strict JSON equality with the document value |
//! | `{$startsWith: s}` / `{$endsWith: s}` | string prefix/suffix |
//! | `{$ignoreCaseEquals: s}` | case-insensitive string equality |
//! | `{$exists: b}` | property presence equals `b` |
//! | `{$isNull: b}` | `value == null` equals `b` |
//! | `{$anythingBut: v \| v[]}` | value equals none of the given values |
//! | `{$gt\|$gte\|$lt\|$lte: n}` | numeric comparison; non-numbers never match |
//! | `{$between: [lo, hi]}` | inclusive numeric range |
//! | `{$includes: v}` | array containment or string substring |
//!
//! ## Error Model
//!
//! Parsing a malformed filter document yields `InvalidFilter`. Evaluation
//! itself never fails: a type mismatch simply does not match.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::TracelineError;

/// A parsed event filter: the validated form of a filter document.
///
/// Construction goes through [`EventFilter::from_value`], which rejects
/// malformed documents; a constructed filter always evaluates cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    nodes: BTreeMap<String, FilterNode>,
}

/// One level of a filter: either a nested object filter or a matcher list.
#[derive(Debug, Clone, PartialEq)]
enum FilterNode {
    Nested(BTreeMap<String, FilterNode>),
    AnyOf(Vec<Matcher>),
}

/// A single content matcher.
#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Equals(Value),
    StartsWith(String),
    EndsWith(String),
    IgnoreCaseEquals(String),
    Exists(bool),
    IsNull(bool),
    AnythingBut(Vec<Value>),
    GreaterThan(f64),
    GreaterThanOrEqual(f64),
    LessThan(f64),
    LessThanOrEqual(f64),
    Between(f64, f64),
    Includes(Value),
}

impl EventFilter {
    /// Parses and validates a filter document.
    pub fn from_value(value: &Value) -> Result<Self, TracelineError> {
        match value {
            Value::Object(map) => Ok(Self { nodes: parse_object(map)? }),
            other => Err(invalid(format!("filter root must be an object, got {}", type_name(other)))),
        }
    }

    /// Evaluates this filter against a document. Never fails; a type
    /// mismatch is a non-match.
    pub fn evaluate(&self, document: &Value) -> bool {
        eval_object(&self.nodes, Some(document))
    }
}

fn invalid(message: impl Into<String>) -> TracelineError {
    TracelineError::InvalidFilter(message.into())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_object(map: &serde_json::Map<String, Value>) -> Result<BTreeMap<String, FilterNode>, TracelineError> {
    let mut nodes = BTreeMap::new();
    for (key, value) in map {
        let node = match value {
            Value::Object(nested) => FilterNode::Nested(parse_object(nested)?),
            Value::Array(matchers) => FilterNode::AnyOf(parse_matchers(key, matchers)?),
            other => {
                return Err(invalid(format!(
                    "filter key '{}' must map to an object or a matcher array, got {}",
                    key,
                    type_name(other)
                )))
            }
        };
        nodes.insert(key.clone(), node);
    }
    Ok(nodes)
}

fn parse_matchers(key: &str, raw: &[Value]) -> Result<Vec<Matcher>, TracelineError> {
    if raw.is_empty() {
        return Err(invalid(format!("matcher array for '{}' must not be empty", key)));
    }
    raw.iter().map(|m| parse_matcher(key, m)).collect()
}

fn parse_matcher(key: &str, raw: &Value) -> Result<Matcher, TracelineError> {
    match raw {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(Matcher::Equals(raw.clone())),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(invalid(format!(
                    "content matcher for '{}' must have exactly one operator, got {}",
                    key,
                    map.len()
                )));
            }
            // Single-entry map checked above.
            let (op, operand) = map.iter().next().ok_or_else(|| invalid("empty matcher object"))?;
            parse_operator(key, op, operand)
        }
        other => Err(invalid(format!(
            "matcher for '{}' must be a primitive or operator object, got {}",
            key,
            type_name(other)
        ))),
    }
}

fn parse_operator(key: &str, op: &str, operand: &Value) -> Result<Matcher, TracelineError> {
    match op {
        "$startsWith" => Ok(Matcher::StartsWith(expect_string(key, op, operand)?)),
        "$endsWith" => Ok(Matcher::EndsWith(expect_string(key, op, operand)?)),
        "$ignoreCaseEquals" => Ok(Matcher::IgnoreCaseEquals(expect_string(key, op, operand)?)),
        "$exists" => Ok(Matcher::Exists(expect_bool(key, op, operand)?)),
        "$isNull" => Ok(Matcher::IsNull(expect_bool(key, op, operand)?)),
        "$anythingBut" => {
            let values = match operand {
                Value::Array(items) => {
                    for item in items {
                        expect_primitive(key, op, item)?;
                    }
                    items.clone()
                }
                single => vec![expect_primitive(key, op, single)?],
            };
            Ok(Matcher::AnythingBut(values))
        }
        "$gt" => Ok(Matcher::GreaterThan(expect_number(key, op, operand)?)),
        "$gte" => Ok(Matcher::GreaterThanOrEqual(expect_number(key, op, operand)?)),
        "$lt" => Ok(Matcher::LessThan(expect_number(key, op, operand)?)),
        "$lte" => Ok(Matcher::LessThanOrEqual(expect_number(key, op, operand)?)),
        "$between" => match operand {
            Value::Array(bounds) if bounds.len() == 2 => {
                let lo = expect_number(key, op, &bounds[0])?;
                let hi = expect_number(key, op, &bounds[1])?;
                Ok(Matcher::Between(lo, hi))
            }
            _ => Err(invalid(format!("'{}': $between requires a [lo, hi] pair", key))),
        },
        "$includes" => {
            expect_primitive(key, op, operand)?;
            Ok(Matcher::Includes(operand.clone()))
        }
        unknown => Err(invalid(format!("'{}': unknown operator {}", key, unknown))),
    }
}

fn expect_string(key: &str, op: &str, operand: &Value) -> Result<String, TracelineError> {
    operand
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("'{}': {} requires a string operand", key, op)))
}

fn expect_bool(key: &str, op: &str, operand: &Value) -> Result<bool, TracelineError> {
    operand
        .as_bool()
        .ok_or_else(|| invalid(format!("'{}': {} requires a boolean operand", key, op)))
}

fn expect_number(key: &str, op: &str, operand: &Value) -> Result<f64, TracelineError> {
    operand
        .as_f64()
        .ok_or_else(|| invalid(format!("'{}': {} requires a numeric operand", key, op)))
}

fn expect_primitive(key: &str, op: &str, operand: &Value) -> Result<Value, TracelineError> {
    match operand {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(operand.clone()),
        other => Err(invalid(format!(
            "'{}': {} requires primitive operands, got {}",
            key,
            op,
            type_name(other)
        ))),
    }
}

fn eval_object(nodes: &BTreeMap<String, FilterNode>, document: Option<&Value>) -> bool {
    nodes.iter().all(|(key, node)| {
        let value = document.and_then(|d| d.get(key));
        match node {
            FilterNode::Nested(children) => eval_object(children, value),
            FilterNode::AnyOf(matchers) => matchers.iter().any(|m| matcher_matches(m, value)),
        }
    })
}

fn matcher_matches(matcher: &Matcher, value: Option<&Value>) -> bool {
    let value = match value {
        Some(v) => v,
        // A missing path only satisfies absence-style matchers.
        None => return matches!(matcher, Matcher::Exists(false) | Matcher::IsNull(true)),
    };

    match matcher {
        Matcher::Equals(expected) => json_equals(value, expected),
        Matcher::StartsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
        Matcher::EndsWith(suffix) => value.as_str().is_some_and(|s| s.ends_with(suffix)),
        Matcher::IgnoreCaseEquals(expected) => value
            .as_str()
            .is_some_and(|s| s.to_lowercase() == expected.to_lowercase()),
        Matcher::Exists(expected) => *expected,
        Matcher::IsNull(expected) => value.is_null() == *expected,
        Matcher::AnythingBut(rejected) => !rejected.iter().any(|r| json_equals(value, r)),
        Matcher::GreaterThan(bound) => value.as_f64().is_some_and(|n| n > *bound),
        Matcher::GreaterThanOrEqual(bound) => value.as_f64().is_some_and(|n| n >= *bound),
        Matcher::LessThan(bound) => value.as_f64().is_some_and(|n| n < *bound),
        Matcher::LessThanOrEqual(bound) => value.as_f64().is_some_and(|n| n <= *bound),
        Matcher::Between(lo, hi) => value.as_f64().is_some_and(|n| n >= *lo && n <= *hi),
        Matcher::Includes(needle) => match value {
            Value::Array(items) => items.iter().any(|item| json_equals(item, needle)),
            Value::String(haystack) => needle.as_str().is_some_and(|n| haystack.contains(n)),
            _ => false,
        },
    }
}

/// Strict JSON equality with numeric widening: `10` and `10.0` are the same
/// number even though serde stores them differently.
fn json_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
