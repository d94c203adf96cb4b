// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Event Stores
//!
//! SQLite-backed implementations of the span-row and event-record storage
//! ports. Entities live in JSON `data` columns beside the indexed lookup
//! columns (see `schema`); all queries are parameterized and run against a
//! pooled connection.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use async_trait::async_trait;

use traceline_domain::entities::{EventRecord, ExternalAccount, TaskEvent};
use traceline_domain::repositories::{EventRecordStore, TaskEventFilter, TaskEventStore};
use traceline_domain::value_objects::{EnvironmentId, EventRecordId, SpanId, TraceId};
use traceline_domain::TracelineError;

pub(crate) fn storage_error(context: &str, e: impl std::fmt::Display) -> TracelineError {
    TracelineError::StorageError(format!("{}: {}", context, e))
}

pub(crate) fn to_json<T: Serialize>(entity: &T) -> Result<String, TracelineError> {
    serde_json::to_string(entity)
        .map_err(|e| TracelineError::SerializationError(format!("Failed to serialize row: {}", e)))
}

pub(crate) fn from_json<T: DeserializeOwned>(data: &str) -> Result<T, TracelineError> {
    serde_json::from_str(data)
        .map_err(|e| TracelineError::SerializationError(format!("Failed to parse stored row: {}", e)))
}

fn rows_to_entities<T: DeserializeOwned>(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<T>, TracelineError> {
    rows.iter()
        .map(|row| {
            let data: String = row
                .try_get("data")
                .map_err(|e| storage_error("Missing data column", e))?;
            from_json(&data)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Task events
// ---------------------------------------------------------------------------

/// SQLite implementation of the [`TaskEventStore`] port.
#[derive(Clone)]
pub struct SqliteTaskEventStore {
    pool: SqlitePool,
}

impl SqliteTaskEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskEventStore for SqliteTaskEventStore {
    async fn insert_many(&self, events: &[TaskEvent]) -> Result<(), TracelineError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin batch insert", e))?;

        for event in events {
            sqlx::query(
                "INSERT INTO task_events (id, run_id, trace_id, span_id, start_time, created_at_ms, data) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.id.to_string())
            .bind(&event.run_id)
            .bind(event.trace_id.as_str())
            .bind(event.span_id.as_str())
            .bind(event.start_time)
            .bind(event.created_at.timestamp_millis())
            .bind(to_json(event)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("Failed to insert span row", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit batch insert", e))
    }

    async fn query(&self, filter: &TaskEventFilter) -> Result<Vec<TaskEvent>, TracelineError> {
        let rows = sqlx::query(
            "SELECT data FROM task_events \
             WHERE (?1 IS NULL OR run_id = ?1) \
               AND (?2 IS NULL OR trace_id = ?2) \
               AND (?3 IS NULL OR span_id = ?3) \
             ORDER BY start_time ASC",
        )
        .bind(filter.run_id.as_deref())
        .bind(filter.trace_id.as_ref().map(|t| t.as_str().to_string()))
        .bind(filter.span_id.as_ref().map(|s| s.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to query span rows", e))?;

        rows_to_entities(rows)
    }

    async fn find_by_trace(&self, trace_id: &TraceId) -> Result<Vec<TaskEvent>, TracelineError> {
        let rows = sqlx::query("SELECT data FROM task_events WHERE trace_id = ? ORDER BY start_time ASC")
            .bind(trace_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load trace rows", e))?;

        rows_to_entities(rows)
    }

    async fn find_by_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
    ) -> Result<Vec<TaskEvent>, TracelineError> {
        let rows = sqlx::query(
            "SELECT data FROM task_events WHERE trace_id = ? AND span_id = ? ORDER BY start_time ASC",
        )
        .bind(trace_id.as_str())
        .bind(span_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load span rows", e))?;

        rows_to_entities(rows)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, TracelineError> {
        let result = sqlx::query("DELETE FROM task_events WHERE created_at_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to truncate span rows", e))?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

/// SQLite implementation of the [`EventRecordStore`] port.
#[derive(Clone)]
pub struct SqliteEventRecordStore {
    pool: SqlitePool,
}

impl SqliteEventRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRecordStore for SqliteEventRecordStore {
    async fn insert(&self, record: &EventRecord) -> Result<(), TracelineError> {
        let result = sqlx::query(
            "INSERT INTO event_records (id, event_id, environment_id, data) VALUES (?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.event_id)
        .bind(record.environment_id.to_string())
        .bind(to_json(record)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(TracelineError::DuplicateKey(format!(
                    "event record ({}, {})",
                    record.event_id, record.environment_id
                )))
            }
            Err(e) => Err(storage_error("Failed to insert event record", e)),
        }
    }

    async fn find_by_id(&self, id: &EventRecordId) -> Result<Option<EventRecord>, TracelineError> {
        let row = sqlx::query("SELECT data FROM event_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load event record", e))?;

        row.map(|r| {
            let data: String = r.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
            from_json(&data)
        })
        .transpose()
    }

    async fn find_by_event_id(
        &self,
        environment_id: &EnvironmentId,
        event_id: &str,
    ) -> Result<Option<EventRecord>, TracelineError> {
        let row = sqlx::query("SELECT data FROM event_records WHERE environment_id = ? AND event_id = ?")
            .bind(environment_id.to_string())
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to look up event record", e))?;

        row.map(|r| {
            let data: String = r.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
            from_json(&data)
        })
        .transpose()
    }

    async fn update(&self, record: &EventRecord) -> Result<(), TracelineError> {
        let result = sqlx::query("UPDATE event_records SET data = ? WHERE id = ?")
            .bind(to_json(record)?)
            .bind(record.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to update event record", e))?;

        if result.rows_affected() == 0 {
            return Err(TracelineError::MissingEntity(format!("event record {}", record.id)));
        }
        Ok(())
    }

    async fn upsert_external_account(
        &self,
        account: &ExternalAccount,
    ) -> Result<ExternalAccount, TracelineError> {
        sqlx::query(
            "INSERT INTO external_accounts (id, environment_id, identifier, data) VALUES (?, ?, ?, ?) \
             ON CONFLICT(environment_id, identifier) DO NOTHING",
        )
        .bind(account.id.to_string())
        .bind(account.environment_id.to_string())
        .bind(&account.identifier)
        .bind(to_json(account)?)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to upsert external account", e))?;

        let row = sqlx::query("SELECT data FROM external_accounts WHERE environment_id = ? AND identifier = ?")
            .bind(account.environment_id.to_string())
            .bind(&account.identifier)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to read back external account", e))?;

        let data: String = row.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
        from_json(&data)
    }
}
