// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Queue Interface
//!
//! Port to the durable background worker queue. The core only enqueues; the
//! queue re-invokes the registered handlers (notably the pipeline runner)
//! out of band. Jobs carry an optional earliest execution time and an
//! optional dedup key: two enqueues with the same `job_key` collapse into
//! one pending job, which is what makes per-step re-enqueueing of a pipeline
//! run idempotent.
//!
//! Enqueues that must commit atomically with database writes do not go
//! through this port; the transactional store operations write outbox rows
//! in the same transaction instead (see `PipelineRunStore`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TracelineError;
use crate::value_objects::{DispatcherId, EventRecordId, QueueId, RunId};

/// Job name for creating a pipeline run from an event record.
pub const JOB_CREATE_PIPELINE: &str = "createPipeline";

/// Job name for executing one pipeline step.
pub const JOB_RUN_PIPELINE: &str = "runPipeline";

/// Job name for delivering a finished event record (delivery subsystem).
pub const JOB_DELIVER_EVENT: &str = "deliverEvent";

/// Job name for invoking a dispatcher with a pipeline output record.
pub const JOB_INVOKE_DISPATCHER: &str = "events.invokeDispatcher";

/// One enqueue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub payload: Value,
    /// Earliest execution time; `None` means as soon as possible.
    pub run_at: Option<DateTime<Utc>>,
    /// Dedup key: identical keys collapse to a single pending job.
    pub job_key: Option<String>,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self { name: name.into(), payload, run_at: None, job_key: None }
    }

    pub fn with_run_at(mut self, run_at: Option<DateTime<Utc>>) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn with_job_key(mut self, job_key: impl Into<String>) -> Self {
        self.job_key = Some(job_key.into());
        self
    }

    /// The `runPipeline` job for one run, deduped per step so a crashed
    /// worker retry cannot double-enqueue the same advancement.
    pub fn run_pipeline(run_id: RunId, step_index: usize) -> Self {
        Self::new(JOB_RUN_PIPELINE, serde_json::json!({ "id": run_id }))
            .with_job_key(format!("pipeline:{}:{}", run_id, step_index))
    }

    /// The `deliverEvent` job for a finished record, scheduled at its
    /// delivery time and deduped per record.
    pub fn deliver_event(record_id: EventRecordId, deliver_at: Option<DateTime<Utc>>) -> Self {
        Self::new(JOB_DELIVER_EVENT, serde_json::json!({ "id": record_id }))
            .with_run_at(deliver_at)
            .with_job_key(format!("event:{}", record_id))
    }

    /// The `events.invokeDispatcher` job for a dispatcher output record.
    pub fn invoke_dispatcher(dispatcher_id: DispatcherId, record_id: EventRecordId) -> Self {
        Self::new(
            JOB_INVOKE_DISPATCHER,
            serde_json::json!({ "id": dispatcher_id, "eventRecordId": record_id }),
        )
    }
}

/// Payload of a `createPipeline` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePipelinePayload {
    #[serde(rename = "type")]
    pub run_type: crate::entities::RunType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher_id: Option<DispatcherId>,
    pub event_record_id: EventRecordId,
}

/// Payload of a `runPipeline` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPipelinePayload {
    pub id: RunId,
}

/// Interface to the durable worker queue.
#[async_trait]
pub trait WorkerQueue: Send + Sync {
    /// Enqueues a job. Honors `run_at` scheduling and `job_key` dedup.
    async fn enqueue(&self, job: JobRequest) -> Result<(), TracelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_pipeline_job_key_varies_by_step() {
        let run = RunId::new();
        let a = JobRequest::run_pipeline(run, 0);
        let b = JobRequest::run_pipeline(run, 1);
        assert_eq!(a.name, JOB_RUN_PIPELINE);
        assert_ne!(a.job_key, b.job_key);
    }

    #[test]
    fn test_deliver_event_is_deduped_per_record() {
        let record = EventRecordId::new();
        let job = JobRequest::deliver_event(record, None);
        assert_eq!(job.job_key, Some(format!("event:{}", record)));
        assert_eq!(job.payload["id"], serde_json::json!(record));
    }

    #[test]
    fn test_create_pipeline_payload_wire_shape() {
        let payload = CreatePipelinePayload {
            run_type: crate::entities::RunType::Queue,
            queue_id: Some(QueueId::new()),
            dispatcher_id: None,
            event_record_id: EventRecordId::new(),
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["type"], "QUEUE");
        assert!(wire.get("dispatcherId").is_none());
        assert!(wire.get("eventRecordId").is_some());
    }
}
