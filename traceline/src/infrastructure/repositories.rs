// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Adapters
//!
//! SQLite-backed implementations of the storage ports (JSON-in-column rows
//! with indexed lookups, see [`schema`]) and in-memory equivalents for tests
//! and embedded use.

pub mod memory;
pub mod schema;
pub mod sqlite_event_store;
pub mod sqlite_pipeline_store;

pub use memory::{
    InMemoryEventRecordStore, InMemoryPipelineRunStore, InMemoryPipelineStore, InMemoryTaskEventStore,
};
pub use schema::ensure_schema;
pub use sqlite_event_store::{SqliteEventRecordStore, SqliteTaskEventStore};
pub use sqlite_pipeline_store::{SqlitePipelineRunStore, SqlitePipelineStore, SqliteWorkerQueue};
