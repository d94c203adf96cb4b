// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Ingest Service
//!
//! Accepts inbound raw events, upserts the persistent record, and routes it:
//! through the owning queue's pipeline when one is configured, straight to
//! delivery otherwise.
//!
//! ## Upsert Semantics
//!
//! `(eventId, environmentId)` identifies an event. A re-send of an existing
//! event updates the stored payload, context, queue, and delivery time only
//! while the record is inside its deliverable window (at least 5 seconds of
//! headroom before scheduled delivery); otherwise the stored row is final
//! and is returned unchanged, with no re-routing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use traceline_domain::entities::{EventRecord, ExternalAccount, RunType};
use traceline_domain::repositories::{
    CreatePipelinePayload, EventRecordStore, JobRequest, PipelineStore, WorkerQueue,
    JOB_CREATE_PIPELINE,
};
use traceline_domain::value_objects::{EnvironmentId, ProjectId};
use traceline_domain::TracelineError;

/// The tenancy scope an event arrives under.
#[derive(Debug, Clone, Copy)]
pub struct IngestEnvironment {
    pub environment_id: EnvironmentId,
    pub project_id: ProjectId,
}

/// An inbound raw event, as the HTTP/SDK surface hands it over.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Client-supplied event id, unique per environment.
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub payload_type: Option<String>,
    pub context: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawEvent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            payload_type: None,
            context: None,
            timestamp: None,
        }
    }
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendEventOptions {
    /// Absolute delivery time; wins over `deliver_after`.
    pub deliver_at: Option<DateTime<Utc>>,
    /// Relative delivery delay in seconds.
    pub deliver_after: Option<i64>,
    /// Slug of the queue to route through, resolved against the project.
    pub queue: Option<String>,
    /// External account identifier to attach.
    pub account_id: Option<String>,
}

/// The inbound-event upsert and routing service.
pub struct EventIngest {
    records: Arc<dyn EventRecordStore>,
    pipelines: Arc<dyn PipelineStore>,
    worker_queue: Arc<dyn WorkerQueue>,
}

impl EventIngest {
    pub fn new(
        records: Arc<dyn EventRecordStore>,
        pipelines: Arc<dyn PipelineStore>,
        worker_queue: Arc<dyn WorkerQueue>,
    ) -> Self {
        Self { records, pipelines, worker_queue }
    }

    /// Upserts an inbound event and routes it. Returns the stored record —
    /// freshly created, updated in its deliverable window, or the unchanged
    /// final row.
    pub async fn send(
        &self,
        environment: &IngestEnvironment,
        raw: RawEvent,
        options: SendEventOptions,
        source_context: Option<Value>,
        event_source: Option<&str>,
    ) -> Result<EventRecord, TracelineError> {
        let now = Utc::now();
        let deliver_at = options
            .deliver_at
            .or_else(|| options.deliver_after.map(|secs| now + Duration::seconds(secs)));

        // Resolve the queue up front: an unknown slug fails the send.
        let queue = match &options.queue {
            Some(slug) => Some(
                self.pipelines
                    .find_queue_by_slug(&environment.project_id, slug)
                    .await?
                    .ok_or_else(|| {
                        TracelineError::MissingEntity(format!(
                            "queue ({}, {})",
                            environment.project_id, slug
                        ))
                    })?,
            ),
            None => None,
        };

        if let Some(account_id) = &options.account_id {
            self.records
                .upsert_external_account(&ExternalAccount::new(environment.environment_id, account_id))
                .await?;
        }

        let context = raw.context.clone().unwrap_or_else(|| Value::Object(Default::default()));

        let record = match self
            .records
            .find_by_event_id(&environment.environment_id, &raw.id)
            .await?
        {
            Some(mut existing) => {
                if !existing.within_update_window(now) {
                    // Final: no mutation, no re-routing.
                    debug!("Event {} outside its update window; returning stored row", raw.id);
                    return Ok(existing);
                }
                existing.apply_update(
                    raw.payload,
                    context,
                    queue.as_ref().map(|q| q.id),
                    deliver_at,
                    now,
                );
                self.records.update(&existing).await?;
                existing
            }
            None => {
                let mut record = EventRecord::new(
                    raw.id,
                    environment.environment_id,
                    raw.name,
                    raw.payload,
                    event_source.unwrap_or("api"),
                )
                .with_context(context)
                .with_deliver_at(deliver_at);

                record.payload_type = raw.payload_type;
                if let Some(timestamp) = raw.timestamp {
                    record.timestamp = timestamp;
                }
                if let Some(source_context) = source_context {
                    record = record.with_source_context(source_context);
                }
                if let Some(queue) = &queue {
                    record = record.with_queue(queue.id);
                }

                self.records.insert(&record).await?;
                info!("Stored inbound event {} for environment {}", record.event_id, record.environment_id);
                record
            }
        };

        // Post-write routing: pipeline first when the queue has steps,
        // otherwise straight to delivery.
        match &queue {
            Some(queue) if queue.has_pipeline() => {
                let payload = CreatePipelinePayload {
                    run_type: RunType::Queue,
                    queue_id: Some(queue.id),
                    dispatcher_id: None,
                    event_record_id: record.id,
                };
                self.worker_queue
                    .enqueue(
                        JobRequest::new(JOB_CREATE_PIPELINE, serde_json::to_value(&payload)?)
                            .with_job_key(format!("pipeline:create:{}", record.id)),
                    )
                    .await?;
            }
            _ => {
                self.worker_queue
                    .enqueue(JobRequest::deliver_event(record.id, record.deliver_at))
                    .await?;
            }
        }

        Ok(record)
    }
}
