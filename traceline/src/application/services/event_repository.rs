// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Repository Service
//!
//! The span ingestion and query surface. Writes flow through the flush
//! scheduler by default (`insert`), or synchronously for callers that need
//! durability confirmed (`insert_immediate`). After any persistence the
//! repository publishes one broker message per distinct `(traceId, spanId)`
//! pair that landed, so live subscribers learn about every state change.
//!
//! ## Span Synthesis
//!
//! `record_event` produces a zero-duration completed span; `trace_event`
//! wraps an async closure, measures its wall-clock duration on a monotonic
//! clock, and persists the span even when the closure fails (the error
//! re-propagates after the insert). Both fail fast with `MissingRunId` when
//! no run id is supplied: spans without an owning run are unattributable.
//!
//! ## Lifecycle Rows
//!
//! `complete_event`, `cancel_event`, and `crash_event` append superseding
//! rows; nothing is updated in place. Query-time assembly resolves the row
//! set to the effective span state.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, warn};

use traceline_domain::entities::task_event::nanos_since_epoch;
use traceline_domain::entities::{SpanException, SpanLink, TaskEvent};
use traceline_domain::repositories::{
    span_channel, trace_pattern, BrokerMessage, EventBroker, TaskEventFilter, TaskEventStore,
};
use traceline_domain::services::{
    assemble_trace, canonicalize_output, rewrite_stacktrace, visible_properties,
    TraceSummary, PROJECT_DIR_ATTRIBUTE,
};
use traceline_domain::value_objects::{SpanId, TraceContext, TraceId};
use traceline_domain::TracelineError;

use crate::infrastructure::batching::{FlushCallback, FlushScheduler};
use crate::infrastructure::config::EventsConfig;
use crate::infrastructure::metrics::MetricsService;

/// Options for synthesizing a span via [`EventRepository::record_event`].
#[derive(Debug, Clone, Default)]
pub struct RecordEventOptions {
    /// The owning task run; required.
    pub run_id: Option<String>,
    /// Parent trace context, if the span continues an existing trace.
    pub context: Option<TraceContext>,
    /// Seed for deterministic span-id derivation (stable across retries).
    pub span_id_seed: Option<String>,
    /// Explicit start time in nanoseconds; defaults to now.
    pub start_time: Option<i64>,
    /// When set, the incoming parent becomes a span link instead of a
    /// `parentId`, and a fresh trace is minted.
    pub span_parent_as_link: bool,
    pub properties: Option<Value>,
    pub style: Option<Value>,
    pub payload: Option<Value>,
    pub payload_type: Option<String>,
}

/// Options for [`EventRepository::trace_event`].
#[derive(Debug, Clone, Default)]
pub struct TraceEventOptions {
    pub record: RecordEventOptions,
    /// Insert a partial row: the span stays open until `complete_event`.
    pub incomplete: bool,
}

/// Options for [`EventRepository::complete_event`].
#[derive(Debug, Clone, Default)]
pub struct CompleteEventOptions {
    /// Completion instant; defaults to now.
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub output_type: Option<String>,
}

#[derive(Debug, Default)]
struct SpanBuilderState {
    properties: serde_json::Map<String, Value>,
    style: Option<Value>,
    output: Option<Value>,
    output_type: Option<String>,
}

/// Mutable span under construction, handed to `trace_event` closures.
///
/// Cloning shares the underlying state, so the closure can move its copy
/// into spawned work while the repository keeps the original for persisting.
#[derive(Clone, Default)]
pub struct SpanBuilder {
    state: Arc<Mutex<SpanBuilderState>>,
}

impl SpanBuilder {
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.state.lock().properties.insert(key.into(), value);
    }

    pub fn set_style(&self, style: Value) {
        self.state.lock().style = Some(style);
    }

    pub fn set_output(&self, output: Value, output_type: Option<String>) {
        let mut state = self.state.lock();
        state.output = Some(output);
        state.output_type = output_type;
    }
}

/// A presentable single span: derived row content with internal properties
/// stripped and stack traces rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanDetail {
    pub span_id: SpanId,
    pub trace_id: TraceId,
    pub parent_id: Option<SpanId>,
    pub message: String,
    pub is_partial: bool,
    pub is_cancelled: bool,
    pub is_error: bool,
    pub start_time: i64,
    pub duration: i64,
    pub properties: Value,
    pub payload: Option<Value>,
    pub output: Option<Value>,
    pub events: Vec<traceline_domain::entities::SpanEvent>,
    pub links: Vec<SpanLink>,
    pub style: Option<Value>,
}

/// A live trace subscription with gauge accounting.
///
/// Closing (or dropping) removes the broker registration synchronously and
/// decrements the live-subscriber gauge exactly once.
pub struct TraceSubscription {
    subscription: traceline_domain::repositories::BrokerSubscription,
    metrics: Option<MetricsService>,
}

impl TraceSubscription {
    /// Receives the next change notification.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.subscription.recv().await
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> Option<BrokerMessage> {
        self.subscription.try_recv()
    }

    /// Closes the subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.subscription.close();
        if let Some(metrics) = self.metrics.take() {
            metrics.subscriber_closed();
        }
    }
}

impl Drop for TraceSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The span ingestion, query, and live-update service.
pub struct EventRepository {
    store: Arc<dyn TaskEventStore>,
    broker: Arc<dyn EventBroker>,
    scheduler: FlushScheduler<TaskEvent>,
    metrics: MetricsService,
    retention: chrono::Duration,
}

impl EventRepository {
    /// Wires the repository and spawns its flush worker.
    pub fn new(
        store: Arc<dyn TaskEventStore>,
        broker: Arc<dyn EventBroker>,
        metrics: MetricsService,
        config: &EventsConfig,
    ) -> Self {
        let callback: FlushCallback<TaskEvent> = {
            let store = store.clone();
            let broker = broker.clone();
            let metrics = metrics.clone();
            Arc::new(move |batch| {
                let store = store.clone();
                let broker = broker.clone();
                let metrics = metrics.clone();
                Box::pin(async move {
                    let batch = suppress_superseded_partials(batch);
                    if let Err(e) = store.insert_many(&batch).await {
                        metrics.record_batch_dropped();
                        return Err(e);
                    }
                    metrics.record_batch_flushed();
                    // Publish failures on the scheduled path are logged and
                    // dropped; storage already holds the rows.
                    if let Err(e) = publish_batch(broker.as_ref(), &batch).await {
                        warn!("Failed to publish span updates for flushed batch: {}", e);
                    }
                    Ok(())
                })
            })
        };

        let scheduler = FlushScheduler::new(config.batch_size, config.flush_interval(), callback);

        Self { store, broker, scheduler, metrics, retention: config.retention() }
    }

    // -- Ingestion ----------------------------------------------------------

    /// Buffers one span row for the next batch.
    pub fn insert(&self, event: TaskEvent) {
        self.metrics.record_events_ingested(1);
        self.scheduler.add_to_batch([event]);
    }

    /// Buffers several span rows for the next batch.
    pub fn insert_many(&self, events: Vec<TaskEvent>) {
        self.metrics.record_events_ingested(events.len());
        self.scheduler.add_to_batch(events);
    }

    /// Writes one span row synchronously, then publishes. Storage failures
    /// propagate to the caller.
    pub async fn insert_immediate(&self, event: TaskEvent) -> Result<(), TracelineError> {
        self.insert_many_immediate(vec![event]).await
    }

    /// Writes several span rows synchronously, then publishes.
    pub async fn insert_many_immediate(&self, events: Vec<TaskEvent>) -> Result<(), TracelineError> {
        let batch = suppress_superseded_partials(events);
        self.store.insert_many(&batch).await?;
        self.metrics.record_events_ingested(batch.len());
        publish_batch(self.broker.as_ref(), &batch).await?;
        Ok(())
    }

    // -- Span synthesis -----------------------------------------------------

    /// Synthesizes a zero-duration, completed span and buffers it.
    pub fn record_event(
        &self,
        message: &str,
        options: RecordEventOptions,
    ) -> Result<TaskEvent, TracelineError> {
        let run_id = require_run_id(&options.run_id, "record_event")?;
        let event = build_span(message, run_id, &options, false);
        self.insert(event.clone());
        Ok(event)
    }

    /// Wraps `f` in a span: the closure receives a [`SpanBuilder`] and the
    /// propagated [`TraceContext`], the duration is measured on a monotonic
    /// clock, and the span is persisted even when `f` fails (the error
    /// re-propagates after the insert).
    pub async fn trace_event<F, Fut, R>(
        &self,
        message: &str,
        options: TraceEventOptions,
        f: F,
    ) -> Result<R, TracelineError>
    where
        F: FnOnce(SpanBuilder, TraceContext) -> Fut,
        Fut: Future<Output = Result<R, TracelineError>>,
    {
        let run_id = require_run_id(&options.record.run_id, "trace_event")?;
        let mut event = build_span(message, run_id, &options.record, options.incomplete);
        let context = TraceContext::new(event.trace_id.clone(), event.span_id.clone());

        let builder = SpanBuilder::default();
        let started = std::time::Instant::now();
        let outcome = f(builder.clone(), context).await;
        let elapsed = started.elapsed().as_nanos().min(i64::MAX as u128) as i64;

        {
            let state = builder.state.lock();
            if !state.properties.is_empty() {
                merge_properties(&mut event.properties, &state.properties);
            }
            if state.style.is_some() {
                event.style = state.style.clone();
            }
            if let Some(output) = &state.output {
                event.output = Some(canonicalize_output(output, state.output_type.as_deref()));
                event.output_type = state.output_type.clone();
            }
        }

        if !options.incomplete {
            event.duration = elapsed;
        }
        if outcome.is_err() {
            event = event.with_error();
        }

        self.insert(event);
        outcome
    }

    /// Completes the open span with the given id: appends a superseding row
    /// carrying the partial row's content, the measured duration, and the
    /// canonicalized output. Returns `None` when no incomplete row exists.
    pub async fn complete_event(
        &self,
        span_id: &SpanId,
        options: CompleteEventOptions,
    ) -> Result<Option<TaskEvent>, TracelineError> {
        let filter = TaskEventFilter { span_id: Some(span_id.clone()), ..Default::default() };
        let incomplete = self.query_incomplete_events(&filter).await?;

        let Some(partial) = incomplete.into_iter().next_back() else {
            return Ok(None);
        };

        let end_time = options.end_time.unwrap_or_else(Utc::now);
        let output = options
            .output
            .as_ref()
            .map(|o| canonicalize_output(o, options.output_type.as_deref()));

        let completion = TaskEvent::completion_of(
            &partial,
            nanos_since_epoch(&end_time),
            output,
            options.output_type,
        );
        self.insert(completion.clone());
        Ok(Some(completion))
    }

    /// Appends the cancellation row for an open span. Rows that are not
    /// partial are left alone: a finished span cannot be cancelled.
    pub fn cancel_event(&self, row: &TaskEvent, cancelled_at: DateTime<Utc>, reason: &str) {
        if !row.is_partial {
            debug!("Ignoring cancellation of non-partial span {}", row.span_id);
            return;
        }
        self.insert(TaskEvent::cancellation_of(row, cancelled_at, reason));
    }

    /// Appends the crash row for an open span.
    pub fn crash_event(&self, row: &TaskEvent, crashed_at: DateTime<Utc>, exception: &SpanException) {
        if !row.is_partial {
            debug!("Ignoring crash of non-partial span {}", row.span_id);
            return;
        }
        self.insert(TaskEvent::crash_of(row, crashed_at, exception));
    }

    // -- Queries ------------------------------------------------------------

    /// Pass-through filtered read, ordered by start time.
    pub async fn query_events(&self, filter: &TaskEventFilter) -> Result<Vec<TaskEvent>, TracelineError> {
        self.store.query(filter).await
    }

    /// Rows that are partial, not cancelled, and not yet superseded by a
    /// completed row within the same result set.
    pub async fn query_incomplete_events(
        &self,
        filter: &TaskEventFilter,
    ) -> Result<Vec<TaskEvent>, TracelineError> {
        let rows = self.store.query(filter).await?;
        let completed: HashSet<SpanId> =
            rows.iter().filter(|r| !r.is_partial).map(|r| r.span_id.clone()).collect();

        Ok(rows
            .into_iter()
            .filter(|r| r.is_partial && !r.is_cancelled && !completed.contains(&r.span_id))
            .collect())
    }

    /// Assembles the rooted trace view for one trace id.
    pub async fn get_trace_summary(&self, trace_id: &TraceId) -> Result<Option<TraceSummary>, TracelineError> {
        let rows = self.store.find_by_trace(trace_id).await?;
        Ok(assemble_trace(&rows))
    }

    /// Hydrates a single span: the superseding row with internal properties
    /// stripped and stack traces rewritten against the project directory.
    pub async fn get_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
    ) -> Result<Option<SpanDetail>, TracelineError> {
        let rows = self.store.find_by_span(trace_id, span_id).await?;

        // Same dedup rule as trace assembly, restricted to one span.
        let row = rows
            .iter()
            .rev()
            .find(|r| r.supersedes_partial())
            .or_else(|| rows.last());

        Ok(row.map(hydrate_span))
    }

    /// Opens a live subscription to every span of one trace.
    pub async fn subscribe_to_trace(&self, trace_id: &TraceId) -> Result<TraceSubscription, TracelineError> {
        let subscription = self.broker.subscribe(&trace_pattern(trace_id)).await?;
        self.metrics.subscriber_opened();
        Ok(TraceSubscription { subscription, metrics: Some(self.metrics.clone()) })
    }

    // -- Maintenance --------------------------------------------------------

    /// Deletes span rows older than the configured retention. Returns the
    /// number of rows removed.
    pub async fn truncate_events(&self) -> Result<u64, TracelineError> {
        let cutoff = Utc::now() - self.retention;
        let deleted = self.store.delete_older_than(cutoff).await?;
        if deleted > 0 {
            debug!("Retention sweep removed {} span rows", deleted);
        }
        Ok(deleted)
    }

    /// W3C-compatible random trace id (32 lowercase hex chars).
    pub fn generate_trace_id(&self) -> TraceId {
        TraceId::generate()
    }

    /// W3C-compatible random span id (16 lowercase hex chars).
    pub fn generate_span_id(&self) -> SpanId {
        SpanId::generate()
    }

    /// Flushes the outstanding batch and stops the flush worker. Called by
    /// process shutdown so accepted spans are not lost.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Waits for the scheduler to drain (test helper).
    pub async fn flushed(&self) {
        self.scheduler.drained().await;
    }
}

fn require_run_id<'a>(run_id: &'a Option<String>, operation: &str) -> Result<&'a str, TracelineError> {
    run_id
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| TracelineError::MissingRunId(format!("{} requires a run id", operation)))
}

/// Resolves ids and parent linkage, then builds the base span row.
fn build_span(
    message: &str,
    run_id: &str,
    options: &RecordEventOptions,
    partial: bool,
) -> TaskEvent {
    let (trace_id, parent_id, link) = match (&options.context, options.span_parent_as_link) {
        (Some(ctx), true) => (
            TraceId::generate(),
            None,
            Some(SpanLink { trace_id: ctx.trace_id.clone(), span_id: ctx.span_id.clone() }),
        ),
        (Some(ctx), false) => (ctx.trace_id.clone(), Some(ctx.span_id.clone()), None),
        (None, _) => (TraceId::generate(), None, None),
    };

    let span_id = match &options.span_id_seed {
        Some(seed) => SpanId::derive(&trace_id, seed),
        None => SpanId::generate(),
    };

    let start = options.start_time.unwrap_or_else(|| nanos_since_epoch(&Utc::now()));

    let mut event = TaskEvent::new(run_id, trace_id, span_id, message, start);
    if let Some(parent) = parent_id {
        event = event.with_parent(parent);
    }
    if let Some(link) = link {
        event = event.with_link(link);
    }
    if let Some(properties) = &options.properties {
        event = event.with_properties(properties.clone());
    }
    if let Some(style) = &options.style {
        event = event.with_style(style.clone());
    }
    if let Some(payload) = &options.payload {
        event = event.with_payload(payload.clone(), options.payload_type.clone());
    }
    if partial {
        event = event.partial();
    }
    event
}

fn merge_properties(target: &mut Value, extra: &serde_json::Map<String, Value>) {
    match target {
        Value::Object(map) => {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
        other => {
            *other = Value::Object(extra.clone());
        }
    }
}

/// Drops partial rows that a non-partial row in the same batch supersedes.
fn suppress_superseded_partials(batch: Vec<TaskEvent>) -> Vec<TaskEvent> {
    let completed: HashSet<SpanId> =
        batch.iter().filter(|e| !e.is_partial).map(|e| e.span_id.clone()).collect();

    batch
        .into_iter()
        .filter(|e| !e.is_partial || !completed.contains(&e.span_id))
        .collect()
}

/// Publishes one message per distinct `(traceId, spanId)` pair in a batch,
/// after the storage write has returned.
async fn publish_batch(broker: &dyn EventBroker, batch: &[TaskEvent]) -> Result<(), TracelineError> {
    let mut seen: HashSet<(TraceId, SpanId)> = HashSet::new();
    let stamp = Utc::now().to_rfc3339();

    for event in batch {
        let key = (event.trace_id.clone(), event.span_id.clone());
        if !seen.insert(key) {
            continue;
        }
        if let Err(e) = broker
            .publish(&span_channel(&event.trace_id, &event.span_id), &stamp)
            .await
        {
            error!("Failed to publish span update for {}: {}", event.span_id, e);
            return Err(e);
        }
    }
    Ok(())
}

fn hydrate_span(row: &TaskEvent) -> SpanDetail {
    let project_dir = row
        .properties
        .get(PROJECT_DIR_ATTRIBUTE)
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut events = row.events.clone();
    if let Some(dir) = &project_dir {
        for event in &mut events {
            if let Some(stack) = event
                .properties
                .pointer("/exception/stacktrace")
                .and_then(Value::as_str)
                .map(|s| rewrite_stacktrace(s, dir))
            {
                if let Some(slot) = event.properties.pointer_mut("/exception/stacktrace") {
                    *slot = Value::String(stack);
                }
            }
        }
    }

    SpanDetail {
        span_id: row.span_id.clone(),
        trace_id: row.trace_id.clone(),
        parent_id: row.parent_id.clone(),
        message: row.message.clone(),
        is_partial: row.is_partial,
        is_cancelled: row.is_cancelled,
        is_error: row.is_error,
        start_time: row.start_time,
        duration: row.duration,
        properties: visible_properties(&row.properties),
        payload: row.payload.clone(),
        output: row.output.clone(),
        events,
        links: row.links.clone(),
        style: row.style.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::InMemoryEventBroker;
    use crate::infrastructure::repositories::InMemoryTaskEventStore;
    use serde_json::json;

    fn test_config() -> EventsConfig {
        EventsConfig { batch_size: 2, batch_interval: 10, ..Default::default() }
    }

    fn repository() -> (EventRepository, InMemoryTaskEventStore, InMemoryEventBroker) {
        let store = InMemoryTaskEventStore::new();
        let broker = InMemoryEventBroker::new();
        let repo = EventRepository::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            MetricsService::new().unwrap(),
            &test_config(),
        );
        (repo, store, broker)
    }

    fn options_with_run() -> RecordEventOptions {
        RecordEventOptions { run_id: Some("run_1".to_string()), ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_event_requires_run_id() {
        let (repo, _, _) = repository();
        let err = repo.record_event("tick", RecordEventOptions::default()).unwrap_err();
        assert!(matches!(err, TracelineError::MissingRunId(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_event_is_zero_duration_and_complete() {
        let (repo, store, _) = repository();
        let event = repo.record_event("tick", options_with_run()).unwrap();
        assert!(!event.is_partial);
        assert_eq!(event.duration, 0);

        repo.flushed().await;
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_event_deterministic_span_id() {
        let (repo, _, _) = repository();
        let trace = TraceId::generate();
        let context = TraceContext::new(trace.clone(), SpanId::generate());

        let make = |repo: &EventRepository| {
            repo.record_event(
                "retry",
                RecordEventOptions {
                    run_id: Some("run_1".to_string()),
                    context: Some(context.clone()),
                    span_id_seed: Some("attempt".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
        };

        let a = make(&repo);
        let b = make(&repo);
        assert_eq!(a.span_id, b.span_id);
        assert_eq!(a.span_id, SpanId::derive(&trace, "attempt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trace_event_measures_duration_and_propagates_value() {
        let (repo, store, _) = repository();

        let value = repo
            .trace_event(
                "work",
                TraceEventOptions { record: options_with_run(), incomplete: false },
                |builder, context| async move {
                    builder.set_attribute("step", json!("one"));
                    assert!(context.traceparent().starts_with("00-"));
                    Ok(42)
                },
            )
            .await
            .unwrap();
        assert_eq!(value, 42);

        repo.flushed().await;
        let rows = store.query(&TaskEventFilter::for_run("run_1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_partial);
        assert_eq!(rows[0].properties["step"], "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trace_event_persists_span_on_failure() {
        let (repo, store, _) = repository();

        let result: Result<(), _> = repo
            .trace_event(
                "work",
                TraceEventOptions { record: options_with_run(), incomplete: false },
                |_builder, _context| async move {
                    Err(TracelineError::InternalError("callback blew up".to_string()))
                },
            )
            .await;
        assert!(result.is_err());

        repo.flushed().await;
        let rows = store.query(&TaskEventFilter::for_run("run_1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_trace_event_and_completion() {
        let (repo, store, _) = repository();

        repo.trace_event(
            "long-running",
            TraceEventOptions { record: options_with_run(), incomplete: true },
            |_builder, _context| async move { Ok(()) },
        )
        .await
        .unwrap();
        repo.flushed().await;

        let open = repo
            .query_incomplete_events(&TaskEventFilter::for_run("run_1"))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        let span_id = open[0].span_id.clone();

        let completed = repo
            .complete_event(
                &span_id,
                CompleteEventOptions {
                    output: Some(json!({"result": {"ok": true}})),
                    output_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .expect("an incomplete row should exist");
        repo.flushed().await;

        assert!(!completed.is_partial);
        // Canonicalization flattens non-preserved output types.
        assert_eq!(completed.output, Some(json!({"result.ok": true})));

        // Completion idempotence: the span no longer shows as incomplete.
        let open = repo
            .query_incomplete_events(&TaskEventFilter::for_run("run_1"))
            .await
            .unwrap();
        assert!(open.is_empty());
        assert_eq!(
            repo.complete_event(&span_id, CompleteEventOptions::default()).await.unwrap(),
            None
        );

        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_suppresses_superseded_partial_and_publishes_once() {
        let (repo, store, broker) = repository();

        let trace = repo.generate_trace_id();
        let span = repo.generate_span_id();
        let mut subscription = repo.subscribe_to_trace(&trace).await.unwrap();

        let partial = TaskEvent::new("run_1", trace.clone(), span.clone(), "work", 0).partial();
        let complete = TaskEvent::completion_of(&partial, 1_000, None, None);

        repo.insert_many(vec![partial, complete]);
        repo.flushed().await;

        // Only the completed row is persisted from the batch.
        assert_eq!(store.row_count(), 1);
        let rows = store.find_by_span(&trace, &span).await.unwrap();
        assert!(!rows[0].is_partial);

        // One publish for the pair.
        assert!(subscription.try_recv().is_some());
        assert!(subscription.try_recv().is_none());

        subscription.unsubscribe();
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_gauge_accounting() {
        let (repo, _, _) = repository();
        let trace = repo.generate_trace_id();

        let mut first = repo.subscribe_to_trace(&trace).await.unwrap();
        let second = repo.subscribe_to_trace(&trace).await.unwrap();
        assert_eq!(repo.metrics.current_subscribers(), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(repo.metrics.current_subscribers(), 1);

        drop(second);
        assert_eq!(repo.metrics.current_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_span_hides_internal_properties_and_rewrites_stacks() {
        let (repo, _, _) = repository();
        let trace = repo.generate_trace_id();
        let span = repo.generate_span_id();

        let mut row = TaskEvent::new("run_1", trace.clone(), span.clone(), "crashed", 0);
        row.properties = json!({
            "user.id": "u1",
            PROJECT_DIR_ATTRIBUTE: "/srv/app"
        });
        row.events.push(traceline_domain::entities::SpanEvent {
            name: "exception".to_string(),
            time: 10,
            properties: json!({"exception": {"stacktrace": "at f (/srv/app/src/a.ts:1:1)"}}),
        });

        repo.insert_immediate(row).await.unwrap();

        let detail = repo.get_span(&trace, &span).await.unwrap().unwrap();
        assert_eq!(detail.properties, json!({"user.id": "u1"}));
        assert_eq!(
            detail.events[0].properties["exception"]["stacktrace"],
            "at f (src/a.ts:1:1)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncate_events_respects_retention() {
        let (repo, store, _) = repository();
        let trace = repo.generate_trace_id();

        let mut old = TaskEvent::new("run_1", trace.clone(), repo.generate_span_id(), "old", 0);
        old.created_at = Utc::now() - chrono::Duration::days(30);
        let fresh = TaskEvent::new("run_1", trace.clone(), repo.generate_span_id(), "fresh", 0);

        repo.insert_many_immediate(vec![old, fresh]).await.unwrap();
        let deleted = repo.truncate_events().await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_ids_have_w3c_shape() {
        let (repo, _, _) = repository();
        assert_eq!(repo.generate_trace_id().as_str().len(), 32);
        assert_eq!(repo.generate_span_id().as_str().len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_span_parent_as_link_mints_fresh_trace() {
        let (repo, store, _) = repository();
        let parent = TraceContext::new(TraceId::generate(), SpanId::generate());

        let event = repo
            .record_event(
                "detached",
                RecordEventOptions {
                    run_id: Some("run_1".to_string()),
                    context: Some(parent.clone()),
                    span_parent_as_link: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_ne!(event.trace_id, parent.trace_id);
        assert_eq!(event.parent_id, None);
        assert_eq!(event.links.len(), 1);
        assert_eq!(event.links[0].span_id, parent.span_id);

        repo.flushed().await;
        assert_eq!(store.row_count(), 1);
    }
}
