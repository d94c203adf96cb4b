// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Traceline
//!
//! Trace/event repository and event-pipeline engine for a background-job
//! platform. The crate layers application services over the domain ports of
//! `traceline-domain` and provides the infrastructure adapters behind them:
//!
//! - **Span ingestion**: high-volume OpenTelemetry-style span rows, coalesced
//!   into batches by the flush scheduler, persisted append-only, and fanned
//!   out to live subscribers through the broker.
//! - **Trace queries**: rooted trace reconstruction with partial/completed
//!   dedup and cancellation propagation, computed at query time.
//! - **Event pipeline**: inbound events upserted with a deliverable window,
//!   routed through declarative filter pipelines executed one transactional
//!   step at a time.
//!
//! ## Construction
//!
//! There are no module-level singletons: the process bootstrap constructs
//! the stores, broker, and services once and passes handles down. Shutdown
//! flushes the outstanding batch and closes broker registrations.

pub mod application;
pub mod infrastructure;

pub use application::services::{EventIngest, EventRepository, PipelineEngine};
pub use infrastructure::config::EventsConfig;
