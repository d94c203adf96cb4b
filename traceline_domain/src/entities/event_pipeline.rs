// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Owners and Steps
//!
//! A pipeline is an ordered list of declarative steps owned by either a
//! queue or an event dispatcher. The two owner kinds differ only in how the
//! final output record is routed after a run succeeds; the step model is
//! shared.
//!
//! Queues are addressed by `(projectId, slug)`; the pair is unique. Step keys
//! are unique within their owning queue or dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::{DispatcherId, EnvironmentId, ProjectId, QueueId, StepId};

/// Kind of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Evaluate a declarative filter against the run's current output.
    Filter,
    /// Declared but unsupported; executing one fails the run.
    Webhook,
}

/// One declarative pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: StepId,
    /// Unique within the owning queue or dispatcher.
    pub key: String,
    pub step_type: StepType,
    pub config: Value,
}

impl PipelineStep {
    pub fn new(key: impl Into<String>, step_type: StepType, config: Value) -> Self {
        Self {
            id: StepId::new(),
            key: key.into(),
            step_type,
            config,
        }
    }
}

/// A named, project-scoped queue owning an ordered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub project_id: ProjectId,
    pub slug: String,
    pub name: String,
    pub steps: Vec<PipelineStep>,
}

impl Queue {
    pub fn new(project_id: ProjectId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: QueueId::new(),
            project_id,
            slug: slug.into(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<PipelineStep>) -> Self {
        self.steps = steps;
        self
    }

    /// True when inbound events on this queue must run the pipeline before
    /// delivery.
    pub fn has_pipeline(&self) -> bool {
        !self.steps.is_empty()
    }

    /// The step-id snapshot recorded on a new pipeline run.
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id).collect()
    }
}

/// An event dispatcher owning an ordered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDispatcher {
    pub id: DispatcherId,
    pub environment_id: EnvironmentId,
    pub slug: String,
    pub steps: Vec<PipelineStep>,
}

impl EventDispatcher {
    pub fn new(environment_id: EnvironmentId, slug: impl Into<String>) -> Self {
        Self {
            id: DispatcherId::new(),
            environment_id,
            slug: slug.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<PipelineStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id).collect()
    }
}
