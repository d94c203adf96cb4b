// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Owner Store Interface
//!
//! Read port for pipeline owners (queues, dispatchers) and their step
//! definitions. Runs hold step-id snapshots, so the engine resolves each
//! step by id at execution time; a step deleted after snapshotting surfaces
//! as `MissingEntity` when its run reaches it.

use async_trait::async_trait;

use crate::entities::{EventDispatcher, PipelineStep, Queue};
use crate::error::TracelineError;
use crate::value_objects::{DispatcherId, ProjectId, QueueId, StepId};

/// Repository interface for queue/dispatcher definitions.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Resolves a queue by its unique `(projectId, slug)` address.
    async fn find_queue_by_slug(
        &self,
        project_id: &ProjectId,
        slug: &str,
    ) -> Result<Option<Queue>, TracelineError>;

    async fn find_queue(&self, id: &QueueId) -> Result<Option<Queue>, TracelineError>;

    async fn find_dispatcher(
        &self,
        id: &DispatcherId,
    ) -> Result<Option<EventDispatcher>, TracelineError>;

    /// Resolves one step definition by id.
    async fn find_step(&self, id: &StepId) -> Result<Option<PipelineStep>, TracelineError>;
}
