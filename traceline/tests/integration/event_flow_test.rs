// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Flow Integration Tests
//!
//! End-to-end span flows over the assembled application: batched ingestion
//! with live updates, cancellation propagation through trace assembly, and
//! the completion lifecycle.

use chrono::DateTime;
use serde_json::json;

use traceline::application::services::{CompleteEventOptions, RecordEventOptions, TraceEventOptions};
use traceline_domain::entities::TaskEvent;
use traceline_domain::repositories::TaskEventFilter;
use traceline_domain::value_objects::TraceContext;

use crate::common::test_app;

#[tokio::test(start_paused = true)]
async fn test_cancellation_propagates_through_trace_summary() {
    let app = test_app();

    // Spans A (partial, root) at t=0 and B (partial, parent=A) at t=100 ns.
    let trace = app.repository.generate_trace_id();
    let a = TaskEvent::new("run_1", trace.clone(), app.repository.generate_span_id(), "A", 0).partial();
    let b = TaskEvent::new("run_1", trace.clone(), app.repository.generate_span_id(), "B", 100)
        .partial()
        .with_parent(a.span_id.clone());
    app.repository.insert_many_immediate(vec![a.clone(), b.clone()]).await.unwrap();

    // Cancel A at t=500 ns with reason "user".
    app.repository
        .cancel_event(&a, DateTime::from_timestamp_nanos(500), "user");
    app.repository.flushed().await;

    let summary = app
        .repository
        .get_trace_summary(&trace)
        .await
        .unwrap()
        .expect("trace has a root");

    let root = &summary.root_span;
    assert_eq!(root.span_id, a.span_id);
    assert!(root.is_cancelled);
    assert!(!root.is_partial);
    assert_eq!(root.duration, 500);

    let child = summary.spans.iter().find(|s| s.span_id == b.span_id).unwrap();
    assert!(child.is_cancelled);
    assert!(!child.is_partial);
    assert_eq!(child.duration, 400);
}

#[tokio::test(start_paused = true)]
async fn test_batched_partial_and_completion_with_live_updates() {
    let app = test_app();
    let trace = app.repository.generate_trace_id();
    let span = app.repository.generate_span_id();

    let mut subscription = app.repository.subscribe_to_trace(&trace).await.unwrap();

    // Partial and completion of span X land in one batch.
    let partial = TaskEvent::new("run_1", trace.clone(), span.clone(), "work", 0).partial();
    let complete = TaskEvent::completion_of(&partial, 1_000, None, None);
    app.repository.insert_many(vec![partial, complete]);
    app.repository.flushed().await;

    // Storage holds only the completed row.
    assert_eq!(app.task_events.row_count(), 1);
    let rows = app.repository.query_events(&TaskEventFilter::for_run("run_1")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_partial);
    assert_eq!(rows[0].duration, 1_000);

    // Exactly one publish for the (trace, span) pair.
    let message = subscription.try_recv().expect("one live update");
    assert_eq!(message.channel, format!("events:{}:{}", trace, span));
    assert!(subscription.try_recv().is_none());

    subscription.unsubscribe();
    assert_eq!(app.broker.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_nested_trace_events_share_a_trace() {
    let app = test_app();

    let repository = &app.repository;
    let context = repository
        .trace_event(
            "parent",
            TraceEventOptions {
                record: RecordEventOptions { run_id: Some("run_1".to_string()), ..Default::default() },
                incomplete: false,
            },
            |_builder, context| async move {
                repository.record_event(
                    "child",
                    RecordEventOptions {
                        run_id: Some("run_1".to_string()),
                        context: Some(TraceContext::new(
                            context.trace_id.clone(),
                            context.span_id.clone(),
                        )),
                        ..Default::default()
                    },
                )?;
                Ok(context)
            },
        )
        .await
        .unwrap();
    app.repository.flushed().await;

    let summary = app
        .repository
        .get_trace_summary(&context.trace_id)
        .await
        .unwrap()
        .expect("assembled trace");
    assert_eq!(summary.spans.len(), 2);
    assert_eq!(summary.root_span.message, "parent");
    assert_eq!(summary.root_span.children.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completion_lifecycle_is_idempotent() {
    let app = test_app();

    app.repository
        .trace_event(
            "open-span",
            TraceEventOptions {
                record: RecordEventOptions { run_id: Some("run_9".to_string()), ..Default::default() },
                incomplete: true,
            },
            |_builder, _context| async move { Ok(()) },
        )
        .await
        .unwrap();
    app.repository.flushed().await;

    let open = app
        .repository
        .query_incomplete_events(&TaskEventFilter::for_run("run_9"))
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    let span_id = open[0].span_id.clone();

    let first = app
        .repository
        .complete_event(&span_id, CompleteEventOptions { output: Some(json!({"ok": true})), ..Default::default() })
        .await
        .unwrap();
    app.repository.flushed().await;
    assert!(first.is_some());

    // A second completion finds nothing open; query-time dedup keeps one
    // effective row.
    let second = app
        .repository
        .complete_event(&span_id, CompleteEventOptions::default())
        .await
        .unwrap();
    assert!(second.is_none());

    let rows = app
        .repository
        .query_events(&TaskEventFilter::for_run("run_9"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2, "partial row plus one completion row");

    let summary = app
        .repository
        .get_trace_summary(&rows[0].trace_id)
        .await
        .unwrap()
        .expect("assembled trace");
    assert_eq!(summary.spans.len(), 1);
    assert!(!summary.spans[0].is_partial);
}
