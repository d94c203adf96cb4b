// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Flow Integration Tests
//!
//! The full ingest → pipeline → routing chain: an inbound event routed
//! through its queue's filter pipeline, driven by the job pump standing in
//! for the external worker queue.

use serde_json::json;

use traceline::application::services::{RawEvent, SendEventOptions};
use traceline_domain::entities::{PipelineStep, Queue, RunStatus, StepType};
use traceline_domain::repositories::{EventRecordStore, JOB_DELIVER_EVENT};

use crate::common::{pump_jobs, test_app, TestApp};

fn seed_queue(app: &TestApp, config: serde_json::Value) -> Queue {
    let queue = Queue::new(app.environment.project_id, "orders", "Orders")
        .with_steps(vec![PipelineStep::new("only-ok", StepType::Filter, config)]);
    app.pipelines.save_queue(queue.clone());
    queue
}

#[tokio::test]
async fn test_matching_event_flows_to_delivery() {
    let app = test_app();
    seed_queue(&app, json!({"foo": ["ok"]}));

    let record = app
        .ingest
        .send(
            &app.environment,
            RawEvent::new("evt_1", "order.created", json!({"foo": "ok"})),
            SendEventOptions { queue: Some("orders".to_string()), ..Default::default() },
            None,
            None,
        )
        .await
        .unwrap();

    pump_jobs(&app).await;

    // The run succeeded.
    let runs = app.runs.all();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.next_step_index, None);

    // The output record derives its identity from the input and the run.
    let output_event_id = format!("{}:pipeline:{}", record.event_id, run.id);
    let output = app
        .records
        .find_by_event_id(&record.environment_id, &output_event_id)
        .await
        .unwrap()
        .expect("pipeline output record");
    assert_eq!(output.payload, json!({"foo": "ok"}));
    assert!(!output.should_process_queue_pipeline);
    assert_eq!(output.pipeline_output_run_id, Some(run.id));

    // Delivery is enqueued for the output, deduped per record.
    let pending = app.worker_queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, JOB_DELIVER_EVENT);
    assert_eq!(pending[0].job_key, Some(format!("event:{}", output.id)));
}

#[tokio::test]
async fn test_mismatching_event_fails_run_without_delivery() {
    let app = test_app();
    seed_queue(&app, json!({"foo": ["ok"]}));

    let record = app
        .ingest
        .send(
            &app.environment,
            RawEvent::new("evt_1", "order.created", json!({"foo": "no"})),
            SendEventOptions { queue: Some("orders".to_string()), ..Default::default() },
            None,
            None,
        )
        .await
        .unwrap();

    pump_jobs(&app).await;

    let runs = app.runs.all();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failure);
    assert_eq!(runs[0].error.as_deref(), Some("Data does not match filter"));

    // No output record, no delivery job.
    let output_event_id = format!("{}:pipeline:{}", record.event_id, runs[0].id);
    assert!(app
        .records
        .find_by_event_id(&record.environment_id, &output_event_id)
        .await
        .unwrap()
        .is_none());
    assert!(app.worker_queue.pending().is_empty());

    // Property: failure is terminal; re-running changes nothing.
    app.engine.run_pipeline(&runs[0].id).await.unwrap();
    assert_eq!(app.runs.all()[0].status, RunStatus::Failure);
}

#[tokio::test]
async fn test_resend_within_window_updates_before_delivery() {
    let app = test_app();
    let deliver_at = chrono::Utc::now() + chrono::Duration::seconds(60);

    let original = app
        .ingest
        .send(
            &app.environment,
            RawEvent::new("evt_window", "order.created", json!({"v": 1})),
            SendEventOptions { deliver_at: Some(deliver_at), ..Default::default() },
            None,
            None,
        )
        .await
        .unwrap();

    // A resend 3 s later would still see ~57 s of headroom; the store keeps
    // one row with the replacement payload.
    let updated = app
        .ingest
        .send(
            &app.environment,
            RawEvent::new("evt_window", "order.created", json!({"v": 2})),
            SendEventOptions { deliver_at: Some(deliver_at), ..Default::default() },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.payload, json!({"v": 2}));
    assert_eq!(updated.deliver_at, Some(deliver_at));

    // Delivery job dedup: one pending job despite two sends.
    let pending = app.worker_queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].run_at, Some(deliver_at));
}

#[tokio::test]
async fn test_event_without_queue_skips_pipeline() {
    let app = test_app();

    app.ingest
        .send(
            &app.environment,
            RawEvent::new("evt_plain", "ping", json!({})),
            SendEventOptions::default(),
            None,
            None,
        )
        .await
        .unwrap();

    pump_jobs(&app).await;

    assert!(app.runs.all().is_empty());
    let pending = app.worker_queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, JOB_DELIVER_EVENT);
}
