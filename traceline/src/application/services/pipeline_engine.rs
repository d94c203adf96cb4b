// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run Engine
//!
//! Drives persisted pipeline runs one step per invocation. The worker queue
//! re-invokes [`PipelineEngine::run_pipeline`] with a run id; each call
//! executes the step under the cursor inside one transactional store
//! operation, then either re-enqueues itself for the next step or finalizes.
//!
//! ## Failure Discipline
//!
//! No error escapes a step: every step-level failure (invalid filter
//! config, filter mismatch, unsupported step type, missing referenced
//! entity) becomes a persisted `FAILURE` run with a formatted error string.
//! Only infrastructure failures of the store itself propagate, leaving the
//! run untouched for the queue's retry.
//!
//! ## Idempotence
//!
//! Per-step job keys stop duplicate enqueues; re-processing a step is safe
//! because a step has no external side effects, and terminal runs are
//! no-ops on re-invocation.

use std::sync::Arc;

use tracing::{debug, info};

use traceline_domain::entities::{EventRecord, PipelineRun, PipelineStep, RunMetadata, RunType, StepType};
use traceline_domain::repositories::{
    CreatePipelinePayload, EventRecordStore, JobRequest, PipelineRunStore, PipelineStore,
};
use traceline_domain::services::EventFilter;
use traceline_domain::value_objects::RunId;
use traceline_domain::TracelineError;

use crate::infrastructure::metrics::MetricsService;

/// The transactional step runner for event pipelines.
pub struct PipelineEngine {
    runs: Arc<dyn PipelineRunStore>,
    pipelines: Arc<dyn PipelineStore>,
    records: Arc<dyn EventRecordStore>,
    metrics: MetricsService,
}

impl PipelineEngine {
    pub fn new(
        runs: Arc<dyn PipelineRunStore>,
        pipelines: Arc<dyn PipelineStore>,
        records: Arc<dyn EventRecordStore>,
        metrics: MetricsService,
    ) -> Self {
        Self { runs, pipelines, records, metrics }
    }

    /// Creates a pending run for an event record against its owner's step
    /// snapshot, and enqueues the first `runPipeline` invocation.
    pub async fn create_pipeline(
        &self,
        payload: &CreatePipelinePayload,
    ) -> Result<PipelineRun, TracelineError> {
        let record = self
            .records
            .find_by_id(&payload.event_record_id)
            .await?
            .ok_or_else(|| {
                TracelineError::MissingEntity(format!("event record {}", payload.event_record_id))
            })?;

        let (steps, metadata) = match payload.run_type {
            RunType::Queue => {
                let queue_id = payload.queue_id.ok_or_else(|| {
                    TracelineError::MissingEntity("createPipeline QUEUE payload without queueId".to_string())
                })?;
                let queue = self
                    .pipelines
                    .find_queue(&queue_id)
                    .await?
                    .ok_or_else(|| TracelineError::MissingEntity(format!("queue {}", queue_id)))?;
                (queue.step_ids(), RunMetadata { queue_id: Some(queue.id), dispatcher_id: None })
            }
            RunType::Dispatcher => {
                let dispatcher_id = payload.dispatcher_id.ok_or_else(|| {
                    TracelineError::MissingEntity(
                        "createPipeline DISPATCHER payload without dispatcherId".to_string(),
                    )
                })?;
                let dispatcher = self
                    .pipelines
                    .find_dispatcher(&dispatcher_id)
                    .await?
                    .ok_or_else(|| {
                        TracelineError::MissingEntity(format!("dispatcher {}", dispatcher_id))
                    })?;
                (
                    dispatcher.step_ids(),
                    RunMetadata { queue_id: None, dispatcher_id: Some(dispatcher.id) },
                )
            }
        };

        let run = PipelineRun::new(
            payload.run_type,
            steps,
            record.id,
            record.payload.clone(),
            metadata,
        );

        let job = JobRequest::run_pipeline(run.id, 0);
        self.runs.create(&run, job).await?;

        info!("Created {:?} pipeline run {} with {} steps", run.run_type, run.id, run.steps.len());
        Ok(run)
    }

    /// Executes one step of a run. Terminal runs are no-ops; a cursor past
    /// the snapshot finalizes immediately.
    pub async fn run_pipeline(&self, run_id: &RunId) -> Result<(), TracelineError> {
        let Some(mut run) = self.runs.load(run_id).await? else {
            return Err(TracelineError::MissingEntity(format!("pipeline run {}", run_id)));
        };

        if run.is_terminal() || run.next_step_index.is_none() {
            debug!("Ignoring runPipeline for terminal run {}", run.id);
            return Ok(());
        }

        let Some(step_id) = run.current_step() else {
            // Cursor past the snapshot (also the empty-pipeline case).
            return self.finalize(run).await;
        };

        let step = match self.pipelines.find_step(&step_id).await? {
            Some(step) => step,
            None => {
                return self
                    .fail_run(run, TracelineError::MissingEntity(format!("pipeline step {}", step_id)))
                    .await;
            }
        };

        if let Err(step_error) = execute_step(&step, &run) {
            return self.fail_run(run, step_error).await;
        }

        if run.has_remaining_steps() {
            run.advance();
            let next_index = run.next_step_index.unwrap_or_default();
            let job = JobRequest::run_pipeline(run.id, next_index);
            self.runs.advance(&run, job).await?;
            debug!("Run {} advanced to step {}", run.id, next_index);
            Ok(())
        } else {
            self.finalize(run).await
        }
    }

    /// Terminal success: derive the output record from the input event and
    /// enqueue the owner-specific follow-up.
    async fn finalize(&self, mut run: PipelineRun) -> Result<(), TracelineError> {
        let input = match self.records.find_by_id(&run.input_event_id).await? {
            Some(input) => input,
            None => {
                let err = TracelineError::MissingEntity(format!("input event record {}", run.input_event_id));
                return self.fail_run(run, err).await;
            }
        };

        let now = chrono::Utc::now();
        let output_event =
            EventRecord::pipeline_output_of(&input, run.id, run.run_type, run.output.clone(), now);

        let follow_up = match run.run_type {
            RunType::Queue => JobRequest::deliver_event(output_event.id, output_event.deliver_at),
            RunType::Dispatcher => {
                let Some(dispatcher_id) = run.metadata.dispatcher_id else {
                    return self
                        .fail_run(
                            run,
                            TracelineError::MissingEntity(
                                "dispatcher run without dispatcherId metadata".to_string(),
                            ),
                        )
                        .await;
                };
                JobRequest::invoke_dispatcher(dispatcher_id, output_event.id)
            }
        };

        run.succeed();
        self.runs.finalize_success(&run, &output_event, follow_up).await?;
        self.metrics.record_pipeline_run("SUCCESS");
        info!("Run {} finished with output event {}", run.id, output_event.event_id);
        Ok(())
    }

    /// Terminal failure: persist the formatted error. The step error itself
    /// does not propagate; only store failures do.
    async fn fail_run(&self, mut run: PipelineRun, cause: TracelineError) -> Result<(), TracelineError> {
        run.fail(cause.to_string());
        self.runs.fail(&run).await?;
        self.metrics.record_pipeline_run("FAILURE");
        info!("Run {} failed: {}", run.id, cause);
        Ok(())
    }
}

/// Executes one step against the run's current output. Pure dispatch; any
/// error fails the run.
fn execute_step(step: &PipelineStep, run: &PipelineRun) -> Result<(), TracelineError> {
    match step.step_type {
        StepType::Filter => {
            let filter = EventFilter::from_value(&step.config)?;
            if filter.evaluate(&run.output) {
                Ok(())
            } else {
                Err(TracelineError::FilterMismatch)
            }
        }
        StepType::Webhook => Err(TracelineError::UnsupportedStep("WEBHOOK".to_string())),
    }
}
