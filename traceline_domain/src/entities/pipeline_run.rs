// /////////////////////////////////////////////////////////////////////////////
// Traceline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run Entity
//!
//! One execution instance of a step list against one input event. The step
//! list is a snapshot of step ids taken at creation; later edits to the
//! owning queue or dispatcher never affect a run in flight.
//!
//! ## State Machine
//!
//! ```text
//! PENDING ──enqueue→ STARTED ─┬─ step ok, more → STARTED (next_step_index + 1)
//!                             ├─ step ok, done → SUCCESS (terminal)
//!                             └─ step fails    → FAILURE (terminal)
//! ```
//!
//! ## Invariants
//!
//! - `status ∈ {SUCCESS, FAILURE}` ⇒ `next_step_index == None`.
//! - While running, `next_step_index ∈ [0, steps.len())`.
//! - The steps snapshot is immutable after creation.
//!
//! Transitions are only performed through the methods on this type so the
//! invariants hold by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::{DispatcherId, EventRecordId, QueueId, RunId, StepId};

/// Owner kind of a pipeline run; decides how the final output is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Dispatcher,
    Queue,
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failure)
    }
}

/// Owner reference carried in run metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher_id: Option<DispatcherId>,
}

/// One pipeline run. See the module docs for the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub run_type: RunType,
    pub status: RunStatus,
    /// Step-id snapshot taken at creation; never modified afterwards.
    pub steps: Vec<StepId>,
    /// Cursor into `steps`; `None` iff the run is terminal.
    pub next_step_index: Option<usize>,
    pub input_event_id: EventRecordId,
    /// The payload flowing through the steps; starts as the input event's
    /// payload and becomes the output record's payload on success.
    pub output: Value,
    pub metadata: RunMetadata,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a pending run over a step snapshot, seeded with the input
    /// event's payload.
    pub fn new(
        run_type: RunType,
        steps: Vec<StepId>,
        input_event_id: EventRecordId,
        input_payload: Value,
        metadata: RunMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            run_type,
            status: RunStatus::Pending,
            steps,
            next_step_index: Some(0),
            input_event_id,
            output: input_payload,
            metadata,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The step id under the cursor, if the run can still make progress.
    pub fn current_step(&self) -> Option<StepId> {
        let index = self.next_step_index?;
        self.steps.get(index).copied()
    }

    /// True when a further step exists beyond the cursor.
    ///
    /// The advancement rule: advance only when `steps[next_step_index + 1]`
    /// exists; otherwise the current invocation finalizes after executing
    /// the step under the cursor.
    pub fn has_remaining_steps(&self) -> bool {
        match self.next_step_index {
            Some(index) => index + 1 < self.steps.len(),
            None => false,
        }
    }

    /// Advances the cursor past a succeeded step, keeping the run live.
    pub fn advance(&mut self) {
        if let Some(index) = self.next_step_index {
            self.status = RunStatus::Started;
            self.next_step_index = Some(index + 1);
            self.updated_at = Utc::now();
        }
    }

    /// Terminal success: clears the cursor.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.next_step_index = None;
        self.updated_at = Utc::now();
    }

    /// Terminal failure: clears the cursor and records the formatted error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failure;
        self.next_step_index = None;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}
