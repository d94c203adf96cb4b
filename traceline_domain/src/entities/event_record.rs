// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Record Entity
//!
//! An inbound event persisted by ingest. Records are immutable after create
//! except for a small deliverable window: while at least 5 seconds remain
//! before scheduled delivery, a re-send of the same `(eventId, environmentId)`
//! may replace the payload, context, queue, and delivery time. Once the
//! window closes the stored row is final and re-sends return it unchanged.
//!
//! A pipeline run that finishes successfully derives a new record from its
//! input (`{inputEventId}:pipeline:{runId}`) carrying the run's output as the
//! payload; the `should_process_*` flags on the derived record mark it as
//! already processed so it is routed to delivery rather than back into a
//! pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::pipeline_run::RunType;
use crate::value_objects::{EnvironmentId, EventRecordId, ExternalAccountId, QueueId, RunId};

/// Seconds of remaining delivery headroom required for an update to land.
const UPDATE_WINDOW_SECS: i64 = 5;

/// An inbound event row. See the module docs for mutability rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventRecordId,
    /// Client-supplied identifier, unique together with `environment_id`.
    pub event_id: String,
    pub environment_id: EnvironmentId,
    pub name: String,
    pub payload: Value,
    pub payload_type: Option<String>,
    pub context: Value,
    pub source_context: Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub queue_id: Option<QueueId>,
    pub should_process_queue_pipeline: bool,
    pub should_process_dispatcher_pipeline: bool,
    /// Absent means immediate delivery.
    pub deliver_at: Option<DateTime<Utc>>,
    /// Set on records produced by a pipeline run, linking back to the run.
    pub pipeline_output_run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        event_id: impl Into<String>,
        environment_id: EnvironmentId,
        name: impl Into<String>,
        payload: Value,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EventRecordId::new(),
            event_id: event_id.into(),
            environment_id,
            name: name.into(),
            payload,
            payload_type: None,
            context: Value::Object(Default::default()),
            source_context: Value::Object(Default::default()),
            source: source.into(),
            timestamp: now,
            queue_id: None,
            should_process_queue_pipeline: true,
            should_process_dispatcher_pipeline: true,
            deliver_at: None,
            pipeline_output_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_source_context(mut self, source_context: Value) -> Self {
        self.source_context = source_context;
        self
    }

    pub fn with_queue(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    pub fn with_deliver_at(mut self, deliver_at: Option<DateTime<Utc>>) -> Self {
        self.deliver_at = deliver_at;
        self
    }

    /// True while a re-send may still replace this record's deliverables.
    ///
    /// The window requires a scheduled delivery at least 5 seconds away;
    /// immediate-delivery records (no `deliver_at`) are final at create.
    pub fn within_update_window(&self, now: DateTime<Utc>) -> bool {
        match self.deliver_at {
            Some(deliver_at) => deliver_at >= now + Duration::seconds(UPDATE_WINDOW_SECS),
            None => false,
        }
    }

    /// Applies a re-send to a record still inside its update window.
    pub fn apply_update(
        &mut self,
        payload: Value,
        context: Value,
        queue_id: Option<QueueId>,
        deliver_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.payload = payload;
        self.context = context;
        self.queue_id = queue_id;
        self.deliver_at = deliver_at;
        self.updated_at = now;
    }

    /// Derives the output record of a successful pipeline run.
    ///
    /// The derived record carries the run's final output as its payload and
    /// is flagged as already processed: queue pipelines never re-run it, and
    /// dispatcher runs also clear the dispatcher flag.
    pub fn pipeline_output_of(
        input: &EventRecord,
        run_id: RunId,
        run_type: RunType,
        output: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventRecordId::new(),
            event_id: format!("{}:pipeline:{}", input.event_id, run_id),
            environment_id: input.environment_id,
            name: input.name.clone(),
            payload: output,
            payload_type: input.payload_type.clone(),
            context: input.context.clone(),
            source_context: input.source_context.clone(),
            source: input.source.clone(),
            timestamp: now,
            queue_id: input.queue_id,
            should_process_queue_pipeline: false,
            should_process_dispatcher_pipeline: match run_type {
                RunType::Dispatcher => false,
                RunType::Queue => input.should_process_dispatcher_pipeline,
            },
            deliver_at: input.deliver_at,
            pipeline_output_run_id: Some(run_id),
            created_at: now,
            updated_at: now,
        }
    }
}

/// External account attached to inbound events, upserted by ingest and keyed
/// by `(environmentId, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: ExternalAccountId,
    pub environment_id: EnvironmentId,
    pub identifier: String,
}

impl ExternalAccount {
    pub fn new(environment_id: EnvironmentId, identifier: impl Into<String>) -> Self {
        Self {
            id: ExternalAccountId::new(),
            environment_id,
            identifier: identifier.into(),
        }
    }
}
