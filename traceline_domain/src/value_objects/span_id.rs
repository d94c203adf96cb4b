// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Span Identifier
//!
//! W3C-compatible span identifier: 8 bytes rendered as 16 lowercase hex
//! characters. A span id is unique within its trace, but the store may hold
//! multiple rows per `(traceId, spanId)` pair (a partial row superseded by a
//! completion row); query-time deduplication resolves the pair to one span.
//!
//! ## Deterministic Derivation
//!
//! When a logical span must keep the same identity across retries, the id is
//! derived instead of drawn at random:
//!
//! ```text
//! spanId = first 8 bytes of SHA1(traceId || seed), hex-encoded
//! ```
//!
//! The same `(traceId, seed)` pair always yields the same span id, so a
//! retried operation lands on the row it wrote the first time.

use std::fmt::{self, Display};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::TracelineError;

/// Number of bytes in a span id (W3C parent-id width).
const SPAN_ID_BYTES: usize = 8;

/// W3C-compatible span identifier (16 lowercase hex characters).
///
/// # Examples
///
/// ```
/// use traceline_domain::value_objects::{SpanId, TraceId};
///
/// let trace = TraceId::generate();
/// let a = SpanId::derive(&trace, "attempt");
/// let b = SpanId::derive(&trace, "attempt");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    /// Generates a new random span id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SPAN_ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Derives a deterministic span id from a trace id and a seed.
    ///
    /// Used when a logical span must be stable across retries: the id is the
    /// first 8 bytes of `SHA1(traceId || seed)`.
    pub fn derive(trace_id: &crate::value_objects::TraceId, seed: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(trace_id.as_str().as_bytes());
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..SPAN_ID_BYTES]))
    }

    /// Parses a span id from its hex form, validating length and alphabet.
    pub fn from_string(value: &str) -> Result<Self, TracelineError> {
        if value.len() != SPAN_ID_BYTES * 2 {
            return Err(TracelineError::ValidationError(format!(
                "Span id must be {} hex characters, got {}",
                SPAN_ID_BYTES * 2,
                value.len()
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(TracelineError::ValidationError(format!(
                "Span id must be lowercase hex: {}",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the hex form of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SpanId {
    type Err = TracelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}
