// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Pipeline Stores
//!
//! SQLite-backed implementations of the pipeline-owner and pipeline-run
//! storage ports, plus the outbox-backed worker queue.
//!
//! The run store's compound operations each run in a single transaction
//! bounded by the 10-second budget: the run transition, any produced event
//! record, and the follow-up job (an `outbox_jobs` row) commit together or
//! not at all. A shipper process drains the outbox into the actual worker
//! queue; from the core's point of view the enqueue is transactional.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use traceline_domain::entities::{EventDispatcher, EventRecord, PipelineRun, PipelineStep, Queue};
use traceline_domain::repositories::{JobRequest, PipelineRunStore, PipelineStore, WorkerQueue};
use traceline_domain::value_objects::{DispatcherId, ProjectId, QueueId, RunId, StepId};
use traceline_domain::TracelineError;

use super::sqlite_event_store::{from_json, storage_error, to_json};

/// Budget for each compound run-store transaction.
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

async fn insert_outbox_job(tx: &mut Transaction<'_, Sqlite>, job: &JobRequest) -> Result<(), TracelineError> {
    sqlx::query(
        "INSERT INTO outbox_jobs (name, job_key, run_at_ms, data) VALUES (?, ?, ?, ?) \
         ON CONFLICT(job_key) DO NOTHING",
    )
    .bind(&job.name)
    .bind(job.job_key.as_deref())
    .bind(job.run_at.map(|t| t.timestamp_millis()))
    .bind(to_json(job)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| storage_error("Failed to write outbox job", e))?;
    Ok(())
}

async fn bounded<T>(
    what: &str,
    fut: impl std::future::Future<Output = Result<T, TracelineError>>,
) -> Result<T, TracelineError> {
    tokio::time::timeout(TRANSACTION_TIMEOUT, fut)
        .await
        .map_err(|_| TracelineError::TimeoutError(format!("{} exceeded the 10 s transaction budget", what)))?
}

// ---------------------------------------------------------------------------
// Worker queue (outbox)
// ---------------------------------------------------------------------------

/// Outbox-backed implementation of the [`WorkerQueue`] port for enqueues
/// outside a store transaction.
#[derive(Clone)]
pub struct SqliteWorkerQueue {
    pool: SqlitePool,
}

impl SqliteWorkerQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pending outbox jobs in insertion order (shipper/test observability).
    pub async fn pending(&self) -> Result<Vec<JobRequest>, TracelineError> {
        let rows = sqlx::query("SELECT data FROM outbox_jobs ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to read outbox", e))?;

        rows.iter()
            .map(|row| {
                let data: String =
                    row.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
                from_json(&data)
            })
            .collect()
    }
}

#[async_trait]
impl WorkerQueue for SqliteWorkerQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<(), TracelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin enqueue", e))?;
        insert_outbox_job(&mut tx, &job).await?;
        tx.commit().await.map_err(|e| storage_error("Failed to commit enqueue", e))
    }
}

// ---------------------------------------------------------------------------
// Pipeline owners
// ---------------------------------------------------------------------------

/// SQLite implementation of the [`PipelineStore`] port, with save helpers
/// for seeding definitions.
#[derive(Clone)]
pub struct SqlitePipelineStore {
    pool: SqlitePool,
}

impl SqlitePipelineStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists a queue definition and its steps.
    pub async fn save_queue(&self, queue: &Queue) -> Result<(), TracelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin queue save", e))?;

        let result = sqlx::query(
            "INSERT INTO queues (id, project_id, slug, data) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(queue.id.to_string())
        .bind(queue.project_id.to_string())
        .bind(&queue.slug)
        .bind(to_json(queue)?)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(TracelineError::DuplicateKey(format!(
                    "queue ({}, {})",
                    queue.project_id, queue.slug
                )))
            }
            Err(e) => return Err(storage_error("Failed to save queue", e)),
        }

        for step in &queue.steps {
            save_step(&mut tx, step).await?;
        }

        tx.commit().await.map_err(|e| storage_error("Failed to commit queue save", e))
    }

    /// Persists a dispatcher definition and its steps.
    pub async fn save_dispatcher(&self, dispatcher: &EventDispatcher) -> Result<(), TracelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin dispatcher save", e))?;

        sqlx::query(
            "INSERT INTO event_dispatchers (id, data) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(dispatcher.id.to_string())
        .bind(to_json(dispatcher)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("Failed to save dispatcher", e))?;

        for step in &dispatcher.steps {
            save_step(&mut tx, step).await?;
        }

        tx.commit().await.map_err(|e| storage_error("Failed to commit dispatcher save", e))
    }
}

async fn save_step(tx: &mut Transaction<'_, Sqlite>, step: &PipelineStep) -> Result<(), TracelineError> {
    sqlx::query(
        "INSERT INTO pipeline_steps (id, data) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET data = excluded.data",
    )
    .bind(step.id.to_string())
    .bind(to_json(step)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| storage_error("Failed to save pipeline step", e))?;
    Ok(())
}

async fn load_json_row<T: serde::de::DeserializeOwned>(
    pool: &SqlitePool,
    sql: &str,
    id: String,
    context: &str,
) -> Result<Option<T>, TracelineError> {
    let row = sqlx::query(sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| storage_error(context, e))?;

    row.map(|r| {
        let data: String = r.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
        from_json(&data)
    })
    .transpose()
}

#[async_trait]
impl PipelineStore for SqlitePipelineStore {
    async fn find_queue_by_slug(
        &self,
        project_id: &ProjectId,
        slug: &str,
    ) -> Result<Option<Queue>, TracelineError> {
        let row = sqlx::query("SELECT data FROM queues WHERE project_id = ? AND slug = ?")
            .bind(project_id.to_string())
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to look up queue by slug", e))?;

        row.map(|r| {
            let data: String = r.try_get("data").map_err(|e| storage_error("Missing data column", e))?;
            from_json(&data)
        })
        .transpose()
    }

    async fn find_queue(&self, id: &QueueId) -> Result<Option<Queue>, TracelineError> {
        load_json_row(&self.pool, "SELECT data FROM queues WHERE id = ?", id.to_string(), "Failed to load queue")
            .await
    }

    async fn find_dispatcher(
        &self,
        id: &DispatcherId,
    ) -> Result<Option<EventDispatcher>, TracelineError> {
        load_json_row(
            &self.pool,
            "SELECT data FROM event_dispatchers WHERE id = ?",
            id.to_string(),
            "Failed to load dispatcher",
        )
        .await
    }

    async fn find_step(&self, id: &StepId) -> Result<Option<PipelineStep>, TracelineError> {
        load_json_row(
            &self.pool,
            "SELECT data FROM pipeline_steps WHERE id = ?",
            id.to_string(),
            "Failed to load pipeline step",
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Pipeline runs
// ---------------------------------------------------------------------------

/// SQLite implementation of the [`PipelineRunStore`] port.
#[derive(Clone)]
pub struct SqlitePipelineRunStore {
    pool: SqlitePool,
}

impl SqlitePipelineRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write_run(tx: &mut Transaction<'_, Sqlite>, run: &PipelineRun) -> Result<(), TracelineError> {
        sqlx::query(
            "INSERT INTO pipeline_runs (id, data) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(run.id.to_string())
        .bind(to_json(run)?)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to write pipeline run", e))?;
        Ok(())
    }
}

#[async_trait]
impl PipelineRunStore for SqlitePipelineRunStore {
    async fn create(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError> {
        bounded("Pipeline run create", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error("Failed to begin run create", e))?;
            Self::write_run(&mut tx, run).await?;
            insert_outbox_job(&mut tx, &job).await?;
            tx.commit().await.map_err(|e| storage_error("Failed to commit run create", e))
        })
        .await
    }

    async fn load(&self, id: &RunId) -> Result<Option<PipelineRun>, TracelineError> {
        load_json_row(
            &self.pool,
            "SELECT data FROM pipeline_runs WHERE id = ?",
            id.to_string(),
            "Failed to load pipeline run",
        )
        .await
    }

    async fn advance(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError> {
        bounded("Pipeline run advance", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error("Failed to begin run advance", e))?;
            Self::write_run(&mut tx, run).await?;
            insert_outbox_job(&mut tx, &job).await?;
            tx.commit().await.map_err(|e| storage_error("Failed to commit run advance", e))
        })
        .await
    }

    async fn finalize_success(
        &self,
        run: &PipelineRun,
        output_event: &EventRecord,
        follow_up: JobRequest,
    ) -> Result<(), TracelineError> {
        bounded("Pipeline run finalize", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error("Failed to begin run finalize", e))?;

            Self::write_run(&mut tx, run).await?;

            let insert = sqlx::query(
                "INSERT INTO event_records (id, event_id, environment_id, data) VALUES (?, ?, ?, ?)",
            )
            .bind(output_event.id.to_string())
            .bind(&output_event.event_id)
            .bind(output_event.environment_id.to_string())
            .bind(to_json(output_event)?)
            .execute(&mut *tx)
            .await;

            match insert {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(TracelineError::DuplicateKey(format!(
                        "pipeline output event {}",
                        output_event.event_id
                    )))
                }
                Err(e) => return Err(storage_error("Failed to insert pipeline output event", e)),
            }

            insert_outbox_job(&mut tx, &follow_up).await?;
            tx.commit().await.map_err(|e| storage_error("Failed to commit run finalize", e))
        })
        .await
    }

    async fn fail(&self, run: &PipelineRun) -> Result<(), TracelineError> {
        bounded("Pipeline run fail", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error("Failed to begin run fail", e))?;
            Self::write_run(&mut tx, run).await?;
            tx.commit().await.map_err(|e| storage_error("Failed to commit run fail", e))
        })
        .await
    }
}
