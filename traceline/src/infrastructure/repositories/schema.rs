// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Schema
//!
//! DDL for every table the SQLite adapters use. Entities are stored as a
//! JSON `data` column beside the columns needed for constraints and indexed
//! lookups, so the row shape follows the entity without a parallel
//! column-mapping layer.
//!
//! Required uniqueness: `event_records(event_id, environment_id)`,
//! `queues(project_id, slug)`, `external_accounts(environment_id,
//! identifier)`, and `outbox_jobs(job_key)` for enqueue dedup. Span lookups
//! index `task_events(trace_id)` and `(span_id)`.

use sqlx::SqlitePool;

use traceline_domain::TracelineError;

/// Full schema, applied idempotently at startup.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task_events (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_events_trace_id ON task_events(trace_id);
CREATE INDEX IF NOT EXISTS idx_task_events_span_id ON task_events(span_id);
CREATE INDEX IF NOT EXISTS idx_task_events_created_at ON task_events(created_at_ms);

CREATE TABLE IF NOT EXISTS event_records (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL,
    environment_id TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE(event_id, environment_id)
);

CREATE TABLE IF NOT EXISTS external_accounts (
    id TEXT PRIMARY KEY,
    environment_id TEXT NOT NULL,
    identifier TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE(environment_id, identifier)
);

CREATE TABLE IF NOT EXISTS queues (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    slug TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE(project_id, slug)
);

CREATE TABLE IF NOT EXISTS event_dispatchers (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_steps (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    job_key TEXT UNIQUE,
    run_at_ms INTEGER,
    data TEXT NOT NULL
);
"#;

/// Applies the schema to a pool. Idempotent; safe to run at every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), TracelineError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| TracelineError::StorageError(format!("Failed to apply schema: {}", e)))?;
    Ok(())
}
