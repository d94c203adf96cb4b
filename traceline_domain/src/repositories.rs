// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Repository & Infrastructure Ports
//!
//! Abstractions between the domain and infrastructure layers: storage ports
//! for spans, event records, pipeline owners, and pipeline runs, plus the
//! worker-queue and pub/sub-broker ports. All ports are `async_trait`
//! traits returning domain errors, so backends can be swapped (SQLite,
//! in-memory, a managed broker) without touching the application layer.

pub mod event_broker;
pub mod event_record_store;
pub mod pipeline_run_store;
pub mod pipeline_store;
pub mod task_event_store;
pub mod worker_queue;

pub use event_broker::{span_channel, trace_pattern, BrokerMessage, BrokerSubscription, EventBroker};
pub use event_record_store::EventRecordStore;
pub use pipeline_run_store::PipelineRunStore;
pub use pipeline_store::PipelineStore;
pub use task_event_store::{TaskEventFilter, TaskEventStore};
pub use worker_queue::{
    CreatePipelinePayload, JobRequest, RunPipelinePayload, WorkerQueue, JOB_CREATE_PIPELINE,
    JOB_DELIVER_EVENT, JOB_INVOKE_DISPATCHER, JOB_RUN_PIPELINE,
};
