// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Event Store Interface
//!
//! Storage port for span rows. The store is append-only through this
//! interface: completion, cancellation, and crash all insert new rows, and
//! only the retention sweep deletes. Implementations must be thread-safe
//! (`Send + Sync`); all operations are asynchronous.
//!
//! Queries never interpret the rows: the derived span state (cancellation
//! propagation, dedup) lives in the trace-assembly service, so any backend
//! that can return rows ordered by start time is sufficient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::TaskEvent;
use crate::error::TracelineError;
use crate::value_objects::{SpanId, TraceId};

/// Filter for span-row queries. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct TaskEventFilter {
    pub run_id: Option<String>,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
}

impl TaskEventFilter {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self { run_id: Some(run_id.into()), ..Default::default() }
    }

    pub fn for_span(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { run_id: None, trace_id: Some(trace_id), span_id: Some(span_id) }
    }
}

/// Repository interface for span-row persistence.
#[async_trait]
pub trait TaskEventStore: Send + Sync {
    /// Inserts a batch of rows. Either the whole batch lands or none of it.
    async fn insert_many(&self, events: &[TaskEvent]) -> Result<(), TracelineError>;

    /// Returns rows matching the filter, ordered by start time ascending.
    async fn query(&self, filter: &TaskEventFilter) -> Result<Vec<TaskEvent>, TracelineError>;

    /// Returns every row of one trace, ordered by start time ascending.
    async fn find_by_trace(&self, trace_id: &TraceId) -> Result<Vec<TaskEvent>, TracelineError>;

    /// Returns every row for one `(traceId, spanId)` pair.
    async fn find_by_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
    ) -> Result<Vec<TaskEvent>, TracelineError>;

    /// Deletes rows created before the cutoff. Returns the number deleted.
    /// Safe to run concurrently with writers.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, TracelineError>;
}
