// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application Services

pub mod event_ingest;
pub mod event_repository;
pub mod pipeline_engine;

pub use event_ingest::{EventIngest, IngestEnvironment, RawEvent, SendEventOptions};
pub use event_repository::{
    CompleteEventOptions, EventRepository, RecordEventOptions, SpanBuilder, SpanDetail,
    TraceEventOptions, TraceSubscription,
};
pub use pipeline_engine::PipelineEngine;
