// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Event Entity
//!
//! The span row: a time-bounded interval of work identified by
//! `(traceId, spanId)`. Rows are append-only; the lifecycle of a span is a
//! sequence of rows rather than mutations of one row:
//!
//! ```text
//! partial row  ──completion──▶  completed row   (same traceId/spanId)
//!              ──cancel──────▶  cancelled row
//!              ──crash───────▶  error row
//! ```
//!
//! Query-time deduplication picks the superseding row: among rows sharing a
//! `spanId`, a row with `!isPartial ∨ isCancelled` wins over a partial row.
//!
//! ## Invariants
//!
//! - A partial row has `duration == 0`; duration is only known at completion.
//! - Completion, cancellation, and crash rows are never partial.
//! - `parent_id` is written once at creation and never rewritten; the tree
//!   shape of a trace is fixed by its rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::{SpanId, TaskEventId, TraceId};

/// Name of the span event prepended by a cancellation row.
pub const CANCELLATION_EVENT: &str = "cancellation";

/// Name of the span event prepended by a crash row.
pub const EXCEPTION_EVENT: &str = "exception";

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Ok,
    Error,
}

/// An in-span event: a named point in time with attached properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    /// Nanoseconds since the Unix epoch.
    pub time: i64,
    pub properties: Value,
}

/// An out-of-tree reference to a span in another (or the same) trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// Exception details recorded on a crash row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanException {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

/// One span row. See the module docs for the append-only lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: TaskEventId,
    /// The task run this span was recorded under. Span synthesis without a
    /// run id is rejected up front (`MissingRunId`).
    pub run_id: String,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub message: String,
    pub status: EventStatus,
    pub is_partial: bool,
    pub is_cancelled: bool,
    pub is_error: bool,
    /// Nanoseconds since the Unix epoch.
    pub start_time: i64,
    /// Nanoseconds; 0 while partial.
    pub duration: i64,
    pub properties: Value,
    pub metadata: Option<Value>,
    pub style: Option<Value>,
    pub payload: Option<Value>,
    pub payload_type: Option<String>,
    pub output: Option<Value>,
    pub output_type: Option<String>,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    /// Row write time; the query-time dedup tiebreak for equally eligible rows.
    pub created_at: DateTime<Utc>,
}

/// Converts a wall-clock timestamp to nanoseconds since the Unix epoch.
///
/// Saturates instead of panicking for dates outside the representable range
/// (year 2262); malformed rows are preferable to a crashed writer.
pub fn nanos_since_epoch(at: &DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl TaskEvent {
    /// Creates a completed zero-duration span row (used by `record_event`).
    pub fn new(
        run_id: impl Into<String>,
        trace_id: TraceId,
        span_id: SpanId,
        message: impl Into<String>,
        start_time: i64,
    ) -> Self {
        Self {
            id: TaskEventId::new(),
            run_id: run_id.into(),
            trace_id,
            span_id,
            parent_id: None,
            message: message.into(),
            status: EventStatus::Ok,
            is_partial: false,
            is_cancelled: false,
            is_error: false,
            start_time,
            duration: 0,
            properties: Value::Object(Default::default()),
            metadata: None,
            style: None,
            payload: None,
            payload_type: None,
            output: None,
            output_type: None,
            events: Vec::new(),
            links: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent_id: SpanId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_style(mut self, style: Value) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_payload(mut self, payload: Value, payload_type: Option<String>) -> Self {
        self.payload = Some(payload);
        self.payload_type = payload_type;
        self
    }

    pub fn with_link(mut self, link: SpanLink) -> Self {
        self.links.push(link);
        self
    }

    /// Marks this row as an open (partial) span. Duration is reset: it is
    /// unknown until a completion row supersedes this one.
    pub fn partial(mut self) -> Self {
        self.is_partial = true;
        self.duration = 0;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration.max(0);
        self
    }

    pub fn with_error(mut self) -> Self {
        self.is_error = true;
        self.status = EventStatus::Error;
        self
    }

    /// Builds the completion row superseding a partial row.
    ///
    /// All content is carried forward; the caller supplies the merged output
    /// (already canonicalized per the output content type).
    pub fn completion_of(
        partial: &TaskEvent,
        end_time: i64,
        output: Option<Value>,
        output_type: Option<String>,
    ) -> Self {
        let mut row = partial.clone();
        row.id = TaskEventId::new();
        row.is_partial = false;
        row.duration = (end_time - partial.start_time).max(0);
        row.output = output;
        row.output_type = output_type;
        row.created_at = Utc::now();
        row
    }

    /// Builds the cancellation row superseding a partial row.
    ///
    /// The row is non-partial and flagged cancelled, with a `cancellation`
    /// span event prepended carrying the reason. Duration runs from the span
    /// start to the cancellation instant.
    pub fn cancellation_of(partial: &TaskEvent, cancelled_at: DateTime<Utc>, reason: &str) -> Self {
        let cancel_time = nanos_since_epoch(&cancelled_at);
        let mut row = partial.clone();
        row.id = TaskEventId::new();
        row.is_partial = false;
        row.is_cancelled = true;
        row.duration = (cancel_time - partial.start_time).max(0);
        row.events.insert(
            0,
            SpanEvent {
                name: CANCELLATION_EVENT.to_string(),
                time: cancel_time,
                properties: serde_json::json!({ "reason": reason }),
            },
        );
        row.created_at = Utc::now();
        row
    }

    /// Builds the crash row superseding a partial row.
    ///
    /// Same shape as cancellation with an `exception` span event instead,
    /// and the row marked as an error.
    pub fn crash_of(partial: &TaskEvent, crashed_at: DateTime<Utc>, exception: &SpanException) -> Self {
        let crash_time = nanos_since_epoch(&crashed_at);
        let mut row = partial.clone();
        row.id = TaskEventId::new();
        row.is_partial = false;
        row.is_error = true;
        row.status = EventStatus::Error;
        row.duration = (crash_time - partial.start_time).max(0);
        row.events.insert(
            0,
            SpanEvent {
                name: EXCEPTION_EVENT.to_string(),
                time: crash_time,
                properties: serde_json::json!({ "exception": exception }),
            },
        );
        row.created_at = Utc::now();
        row
    }

    /// True when this row supersedes a partial row with the same span id.
    pub fn supersedes_partial(&self) -> bool {
        !self.is_partial || self.is_cancelled
    }

    /// Returns the time of the `cancellation` span event, if present.
    pub fn cancellation_time(&self) -> Option<i64> {
        self.events.iter().find(|e| e.name == CANCELLATION_EVENT).map(|e| e.time)
    }
}
