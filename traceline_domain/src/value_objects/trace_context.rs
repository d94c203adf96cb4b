// /////////////////////////////////////////////////////////////////////////////
// Traceline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Trace Context Propagation
//!
//! Carries the `(traceId, spanId)` pair across span boundaries so a child
//! span can link to its parent, and renders the W3C `traceparent` header for
//! propagation to downstream systems.
//!
//! The sampled flag is always `01`: traceline records every span it is
//! handed; sampling happens upstream of ingestion.

use serde::{Deserialize, Serialize};

use crate::error::TracelineError;
use crate::value_objects::{SpanId, TraceId};

/// Propagated trace context: the coordinates of the span currently in scope.
///
/// Handed to `trace_event` callbacks so work they spawn can parent itself
/// correctly, and parsed from inbound options to link a synthesized span
/// under an existing parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }

    /// Renders the W3C `traceparent` header: `00-{traceId}-{spanId}-01`.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Parses a W3C `traceparent` header.
    ///
    /// Only version `00` is accepted. The trailing flags byte is validated
    /// for shape but otherwise ignored.
    pub fn from_traceparent(header: &str) -> Result<Self, TracelineError> {
        let mut parts = header.split('-');
        let version = parts.next().unwrap_or_default();
        let trace = parts.next().unwrap_or_default();
        let span = parts.next().unwrap_or_default();
        let flags = parts.next().unwrap_or_default();

        if version != "00" || flags.len() != 2 || parts.next().is_some() {
            return Err(TracelineError::ValidationError(format!(
                "Malformed traceparent header: {}",
                header
            )));
        }

        Ok(Self {
            trace_id: TraceId::from_string(trace)?,
            span_id: SpanId::from_string(span)?,
        })
    }
}
