// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! Shared wiring for integration tests: a fully assembled application over
//! the in-memory adapters, plus a job pump that plays the role of the
//! external worker queue.

use std::sync::Arc;

use traceline::application::services::{EventIngest, EventRepository, IngestEnvironment, PipelineEngine};
use traceline::infrastructure::config::EventsConfig;
use traceline::infrastructure::messaging::{InMemoryEventBroker, InMemoryWorkerQueue};
use traceline::infrastructure::metrics::MetricsService;
use traceline::infrastructure::repositories::{
    InMemoryEventRecordStore, InMemoryPipelineRunStore, InMemoryPipelineStore, InMemoryTaskEventStore,
};
use traceline_domain::repositories::{JobRequest, JOB_CREATE_PIPELINE, JOB_RUN_PIPELINE};
use traceline_domain::value_objects::{EnvironmentId, ProjectId, RunId};

/// A fully wired application over in-memory adapters.
pub struct TestApp {
    pub repository: EventRepository,
    pub engine: PipelineEngine,
    pub ingest: EventIngest,
    pub task_events: InMemoryTaskEventStore,
    pub records: InMemoryEventRecordStore,
    pub pipelines: InMemoryPipelineStore,
    pub runs: InMemoryPipelineRunStore,
    pub worker_queue: InMemoryWorkerQueue,
    pub broker: InMemoryEventBroker,
    pub environment: IngestEnvironment,
}

/// Builds the application with a small batch size and short flush interval
/// so tests exercise both flush triggers. Must run inside a tokio runtime.
pub fn test_app() -> TestApp {
    let config = EventsConfig { batch_size: 10, batch_interval: 20, ..Default::default() };
    let metrics = MetricsService::new().expect("metrics service");

    let task_events = InMemoryTaskEventStore::new();
    let records = InMemoryEventRecordStore::new();
    let pipelines = InMemoryPipelineStore::new();
    let worker_queue = InMemoryWorkerQueue::new();
    let broker = InMemoryEventBroker::new();
    let runs = InMemoryPipelineRunStore::new(records.clone(), worker_queue.clone());

    let repository = EventRepository::new(
        Arc::new(task_events.clone()),
        Arc::new(broker.clone()),
        metrics.clone(),
        &config,
    );
    let engine = PipelineEngine::new(
        Arc::new(runs.clone()),
        Arc::new(pipelines.clone()),
        Arc::new(records.clone()),
        metrics,
    );
    let ingest = EventIngest::new(
        Arc::new(records.clone()),
        Arc::new(pipelines.clone()),
        Arc::new(worker_queue.clone()),
    );

    let environment =
        IngestEnvironment { environment_id: EnvironmentId::new(), project_id: ProjectId::new() };

    TestApp {
        repository,
        engine,
        ingest,
        task_events,
        records,
        pipelines,
        runs,
        worker_queue,
        broker,
        environment,
    }
}

/// Plays the external worker queue: repeatedly drains pending jobs, driving
/// `createPipeline` and `runPipeline` through the engine. Routing jobs
/// (`deliverEvent`, `events.invokeDispatcher`) are left pending for
/// assertions.
pub async fn pump_jobs(app: &TestApp) {
    loop {
        let mut engine_jobs: Vec<JobRequest> = Vec::new();
        for job in app.worker_queue.drain() {
            if job.name == JOB_CREATE_PIPELINE || job.name == JOB_RUN_PIPELINE {
                engine_jobs.push(job);
            } else {
                app.worker_queue.push(job);
            }
        }
        if engine_jobs.is_empty() {
            return;
        }

        for job in engine_jobs {
            if job.name == JOB_CREATE_PIPELINE {
                let payload = serde_json::from_value(job.payload.clone()).expect("createPipeline payload");
                app.engine.create_pipeline(&payload).await.expect("create pipeline");
            } else {
                let id: RunId = serde_json::from_value(job.payload["id"].clone()).expect("run id");
                app.engine.run_pipeline(&id).await.expect("run pipeline");
            }
        }
    }
}
