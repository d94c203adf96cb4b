// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Trace Identifier
//!
//! W3C-compatible trace identifier: 16 random bytes rendered as 32 lowercase
//! hex characters. A trace groups every span produced by one logical unit of
//! work; all rows sharing a `TraceId` form one trace tree.
//!
//! ## Format
//!
//! ```text
//! 4bf92f3577b34da6a3ce929d0e0e4736    (32 lowercase hex chars)
//! ```
//!
//! The id participates in the W3C `traceparent` header
//! (`00-{traceId}-{spanId}-01`) and in broker channel names
//! (`events:{traceId}:{spanId}`).
//!
//! ## Design Principles
//!
//! - **Value Object**: Immutable, validated at construction
//! - **Type Safety**: A `TraceId` cannot be confused with a `SpanId`
//! - **Interop**: `Display`/`FromStr`/serde round-trip through the hex form

use std::fmt::{self, Display};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::TracelineError;

/// Number of random bytes in a trace id (W3C trace-id width).
const TRACE_ID_BYTES: usize = 16;

/// W3C-compatible trace identifier (32 lowercase hex characters).
///
/// # Examples
///
/// ```
/// use traceline_domain::value_objects::TraceId;
///
/// let id = TraceId::generate();
/// assert_eq!(id.as_str().len(), 32);
///
/// let parsed: TraceId = id.as_str().parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Generates a new random trace id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TRACE_ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parses a trace id from its hex form, validating length and alphabet.
    ///
    /// Uppercase input is rejected: the wire format is lowercase-only and
    /// normalizing silently would hide producer bugs.
    pub fn from_string(value: &str) -> Result<Self, TracelineError> {
        if value.len() != TRACE_ID_BYTES * 2 {
            return Err(TracelineError::ValidationError(format!(
                "Trace id must be {} hex characters, got {}",
                TRACE_ID_BYTES * 2,
                value.len()
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(TracelineError::ValidationError(format!(
                "Trace id must be lowercase hex: {}",
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

impl Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TraceId {
    type Err = TracelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}
