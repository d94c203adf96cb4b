// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Entities
//!
//! The persistent shapes of the system: span rows (`TaskEvent`), inbound
//! event records, pipeline owners (queues and dispatchers) with their step
//! lists, and pipeline runs with the run state machine.

pub mod event_pipeline;
pub mod event_record;
pub mod pipeline_run;
pub mod task_event;

pub use event_pipeline::{EventDispatcher, PipelineStep, Queue, StepType};
pub use event_record::{EventRecord, ExternalAccount};
pub use pipeline_run::{PipelineRun, RunMetadata, RunStatus, RunType};
pub use task_event::{
    nanos_since_epoch, EventStatus, SpanEvent, SpanException, SpanLink, TaskEvent,
    CANCELLATION_EVENT, EXCEPTION_EVENT,
};
