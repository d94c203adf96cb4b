// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Value Objects
//!
//! Immutable, validated value types: trace/span identifiers with W3C
//! formatting rules, typed UUID newtypes for entity identity, and the
//! propagated trace context.

pub mod ids;
pub mod span_id;
pub mod trace_context;
pub mod trace_id;

pub use ids::{
    DispatcherId, EnvironmentId, EventRecordId, ExternalAccountId, ProjectId, QueueId, RunId,
    StepId, TaskEventId,
};
pub use span_id::SpanId;
pub use trace_context::TraceContext;
pub use trace_id::TraceId;
