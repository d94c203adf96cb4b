// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run Store Interface
//!
//! Storage port for pipeline runs. The engine's correctness rests on the
//! compound operations here being atomic: a run transition, the rows it
//! produces, and the follow-up job enqueue either all commit or none do.
//! Backends that cannot enlist the worker queue in their transaction
//! implement the enqueue half as an outbox row written in the same
//! transaction (the SQLite adapter does exactly that).
//!
//! Every compound operation is expected to complete within the 10-second
//! transaction budget; implementations abort with `TimeoutError` past it,
//! leaving no partial state behind.

use async_trait::async_trait;

use crate::entities::{EventRecord, PipelineRun};
use crate::error::TracelineError;
use crate::repositories::worker_queue::JobRequest;
use crate::value_objects::RunId;

/// Repository interface for pipeline run persistence.
#[async_trait]
pub trait PipelineRunStore: Send + Sync {
    /// Persists a new pending run and enqueues its first `runPipeline` job,
    /// atomically.
    async fn create(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError>;

    /// Loads a run by id.
    async fn load(&self, id: &RunId) -> Result<Option<PipelineRun>, TracelineError>;

    /// Persists an advanced run (status STARTED, cursor moved) and enqueues
    /// the next step's `runPipeline` job, atomically.
    async fn advance(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError>;

    /// Persists a succeeded run together with its output event record and
    /// the follow-up routing job, atomically. The output record's
    /// `pipeline_output_run_id` back-link is part of the same commit.
    async fn finalize_success(
        &self,
        run: &PipelineRun,
        output_event: &EventRecord,
        follow_up: JobRequest,
    ) -> Result<(), TracelineError>;

    /// Persists a failed run (terminal, with its formatted error).
    async fn fail(&self, run: &PipelineRun) -> Result<(), TracelineError>;
}
