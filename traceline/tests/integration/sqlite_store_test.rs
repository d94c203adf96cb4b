// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Store Integration Tests
//!
//! Round-trips over the sqlx adapters against an in-memory SQLite database:
//! schema application, JSON row persistence, unique-constraint mapping, and
//! the transactional run-store operations with their outbox rows.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use serde_json::json;

use traceline::infrastructure::repositories::{
    ensure_schema, SqliteEventRecordStore, SqlitePipelineRunStore, SqlitePipelineStore,
    SqliteTaskEventStore, SqliteWorkerQueue,
};
use traceline_domain::entities::{
    EventRecord, ExternalAccount, PipelineRun, PipelineStep, Queue, RunMetadata, RunType, StepType,
    TaskEvent,
};
use traceline_domain::repositories::{
    EventRecordStore, JobRequest, PipelineRunStore, PipelineStore, TaskEventStore, WorkerQueue,
};
use traceline_domain::value_objects::{EnvironmentId, ProjectId, SpanId, TraceId};
use traceline_domain::TracelineError;

/// One shared in-memory database. A single connection keeps every operation
/// on the same SQLite memory instance.
async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    ensure_schema(&pool).await.expect("schema");
    pool
}

#[tokio::test]
async fn test_task_event_round_trip_and_retention() {
    let store = SqliteTaskEventStore::new(pool().await);
    let trace = TraceId::generate();

    let late = TaskEvent::new("run_1", trace.clone(), SpanId::generate(), "late", 2_000);
    let mut early = TaskEvent::new("run_1", trace.clone(), SpanId::generate(), "early", 1_000).partial();
    early.created_at = chrono::Utc::now() - chrono::Duration::days(30);

    store.insert_many(&[late.clone(), early.clone()]).await.unwrap();

    // Ordered by start time, with full content surviving the round trip.
    let rows = store.find_by_trace(&trace).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], early);
    assert_eq!(rows[1], late);

    let pair = store.find_by_span(&trace, &late.span_id).await.unwrap();
    assert_eq!(pair, vec![late]);

    // Retention removes only the old row.
    let deleted = store.delete_older_than(chrono::Utc::now() - chrono::Duration::days(7)).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.find_by_trace(&trace).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_record_unique_constraint_maps_to_duplicate_key() {
    let store = SqliteEventRecordStore::new(pool().await);
    let environment = EnvironmentId::new();

    let record = EventRecord::new("evt_1", environment, "order.created", json!({"a": 1}), "api");
    store.insert(&record).await.unwrap();

    let duplicate = EventRecord::new("evt_1", environment, "order.created", json!({"a": 2}), "api");
    let err = store.insert(&duplicate).await.unwrap_err();
    assert!(matches!(err, TracelineError::DuplicateKey(_)));

    // Lookup paths agree.
    let by_id = store.find_by_id(&record.id).await.unwrap().unwrap();
    let by_event = store.find_by_event_id(&environment, "evt_1").await.unwrap().unwrap();
    assert_eq!(by_id, by_event);

    // Updates replace the stored row.
    let mut updated = record.clone();
    updated.payload = json!({"a": 3});
    store.update(&updated).await.unwrap();
    assert_eq!(
        store.find_by_id(&record.id).await.unwrap().unwrap().payload,
        json!({"a": 3})
    );
}

#[tokio::test]
async fn test_external_account_upsert_is_stable() {
    let store = SqliteEventRecordStore::new(pool().await);
    let environment = EnvironmentId::new();

    let first = store
        .upsert_external_account(&ExternalAccount::new(environment, "acct-1"))
        .await
        .unwrap();
    let second = store
        .upsert_external_account(&ExternalAccount::new(environment, "acct-1"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_queue_persistence_and_step_lookup() {
    let store = SqlitePipelineStore::new(pool().await);
    let project = ProjectId::new();

    let step = PipelineStep::new("only-large", StepType::Filter, json!({"n": [{"$gt": 10}]}));
    let queue = Queue::new(project, "orders", "Orders").with_steps(vec![step.clone()]);
    store.save_queue(&queue).await.unwrap();

    let loaded = store.find_queue_by_slug(&project, "orders").await.unwrap().unwrap();
    assert_eq!(loaded, queue);
    assert_eq!(store.find_queue(&queue.id).await.unwrap().unwrap().slug, "orders");
    assert_eq!(store.find_step(&step.id).await.unwrap().unwrap(), step);
    assert!(store.find_queue_by_slug(&project, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_store_compound_operations_write_outbox() {
    let pool = pool().await;
    let runs = SqlitePipelineRunStore::new(pool.clone());
    let records = SqliteEventRecordStore::new(pool.clone());
    let outbox = SqliteWorkerQueue::new(pool.clone());

    let input = EventRecord::new("evt_in", EnvironmentId::new(), "order.created", json!({"x": 1}), "api");
    records.insert(&input).await.unwrap();

    let mut run = PipelineRun::new(
        RunType::Queue,
        vec![traceline_domain::value_objects::StepId::new()],
        input.id,
        input.payload.clone(),
        RunMetadata::default(),
    );

    runs.create(&run, JobRequest::run_pipeline(run.id, 0)).await.unwrap();
    assert_eq!(runs.load(&run.id).await.unwrap().unwrap(), run);
    assert_eq!(outbox.pending().await.unwrap().len(), 1);

    // Finalize writes the run, the output record, and the follow-up job in
    // one commit.
    run.succeed();
    let output = EventRecord::pipeline_output_of(
        &input,
        run.id,
        RunType::Queue,
        json!({"x": 1}),
        chrono::Utc::now(),
    );
    runs.finalize_success(&run, &output, JobRequest::deliver_event(output.id, None))
        .await
        .unwrap();

    let stored = runs.load(&run.id).await.unwrap().unwrap();
    assert!(stored.is_terminal());
    assert_eq!(records.find_by_id(&output.id).await.unwrap().unwrap(), output);

    let jobs = outbox.pending().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].name, "deliverEvent");
}

#[tokio::test]
async fn test_outbox_dedups_by_job_key() {
    let outbox = SqliteWorkerQueue::new(pool().await);

    let job = JobRequest::new("deliverEvent", json!({"id": "r1"})).with_job_key("event:r1");
    outbox.enqueue(job.clone()).await.unwrap();
    outbox.enqueue(job).await.unwrap();
    outbox
        .enqueue(JobRequest::new("deliverEvent", json!({"id": "r2"})).with_job_key("event:r2"))
        .await
        .unwrap();

    assert_eq!(outbox.pending().await.unwrap().len(), 2);
}
