// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Store Implementations
//!
//! Map-backed implementations of every storage port. They power the test
//! suites and embedded use; the SQLite adapters provide the durable
//! equivalents. Locks are held only for map access, never across awaits.
//!
//! The run store composes the in-memory record store and worker queue so its
//! compound operations observe the same all-or-nothing behavior the SQLite
//! transactions give: everything happens under one lock scope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use traceline_domain::entities::{
    EventDispatcher, EventRecord, ExternalAccount, PipelineRun, PipelineStep, Queue, TaskEvent,
};
use traceline_domain::repositories::{
    EventRecordStore, JobRequest, PipelineRunStore, PipelineStore, TaskEventFilter, TaskEventStore,
};
use traceline_domain::value_objects::{
    DispatcherId, EnvironmentId, EventRecordId, ProjectId, QueueId, RunId, SpanId, StepId, TraceId,
};
use traceline_domain::TracelineError;

use crate::infrastructure::messaging::memory_queue::InMemoryWorkerQueue;

// ---------------------------------------------------------------------------
// Task events
// ---------------------------------------------------------------------------

/// In-memory implementation of the [`TaskEventStore`] port.
#[derive(Clone, Default)]
pub struct InMemoryTaskEventStore {
    rows: Arc<Mutex<Vec<TaskEvent>>>,
}

impl InMemoryTaskEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows held (test observability).
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

fn matches_filter(row: &TaskEvent, filter: &TaskEventFilter) -> bool {
    filter.run_id.as_ref().is_none_or(|r| &row.run_id == r)
        && filter.trace_id.as_ref().is_none_or(|t| &row.trace_id == t)
        && filter.span_id.as_ref().is_none_or(|s| &row.span_id == s)
}

#[async_trait]
impl TaskEventStore for InMemoryTaskEventStore {
    async fn insert_many(&self, events: &[TaskEvent]) -> Result<(), TracelineError> {
        self.rows.lock().extend_from_slice(events);
        Ok(())
    }

    async fn query(&self, filter: &TaskEventFilter) -> Result<Vec<TaskEvent>, TracelineError> {
        let mut rows: Vec<TaskEvent> =
            self.rows.lock().iter().filter(|r| matches_filter(r, filter)).cloned().collect();
        rows.sort_by_key(|r| r.start_time);
        Ok(rows)
    }

    async fn find_by_trace(&self, trace_id: &TraceId) -> Result<Vec<TaskEvent>, TracelineError> {
        self.query(&TaskEventFilter { trace_id: Some(trace_id.clone()), ..Default::default() }).await
    }

    async fn find_by_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
    ) -> Result<Vec<TaskEvent>, TracelineError> {
        self.query(&TaskEventFilter::for_span(trace_id.clone(), span_id.clone())).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, TracelineError> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| r.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordState {
    by_id: HashMap<EventRecordId, EventRecord>,
    by_event_id: HashMap<(EnvironmentId, String), EventRecordId>,
    accounts: HashMap<(EnvironmentId, String), ExternalAccount>,
}

/// In-memory implementation of the [`EventRecordStore`] port.
#[derive(Clone, Default)]
pub struct InMemoryEventRecordStore {
    state: Arc<Mutex<RecordState>>,
}

impl InMemoryEventRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_locked(state: &mut RecordState, record: &EventRecord) -> Result<(), TracelineError> {
        let key = (record.environment_id, record.event_id.clone());
        if state.by_event_id.contains_key(&key) {
            return Err(TracelineError::DuplicateKey(format!(
                "event record ({}, {})",
                record.event_id, record.environment_id
            )));
        }
        state.by_event_id.insert(key, record.id);
        state.by_id.insert(record.id, record.clone());
        Ok(())
    }
}

#[async_trait]
impl EventRecordStore for InMemoryEventRecordStore {
    async fn insert(&self, record: &EventRecord) -> Result<(), TracelineError> {
        Self::insert_locked(&mut self.state.lock(), record)
    }

    async fn find_by_id(&self, id: &EventRecordId) -> Result<Option<EventRecord>, TracelineError> {
        Ok(self.state.lock().by_id.get(id).cloned())
    }

    async fn find_by_event_id(
        &self,
        environment_id: &EnvironmentId,
        event_id: &str,
    ) -> Result<Option<EventRecord>, TracelineError> {
        let state = self.state.lock();
        Ok(state
            .by_event_id
            .get(&(*environment_id, event_id.to_string()))
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn update(&self, record: &EventRecord) -> Result<(), TracelineError> {
        let mut state = self.state.lock();
        if !state.by_id.contains_key(&record.id) {
            return Err(TracelineError::MissingEntity(format!("event record {}", record.id)));
        }
        state.by_id.insert(record.id, record.clone());
        Ok(())
    }

    async fn upsert_external_account(
        &self,
        account: &ExternalAccount,
    ) -> Result<ExternalAccount, TracelineError> {
        let mut state = self.state.lock();
        let key = (account.environment_id, account.identifier.clone());
        let stored = state.accounts.entry(key).or_insert_with(|| account.clone());
        Ok(stored.clone())
    }
}

// ---------------------------------------------------------------------------
// Pipeline owners
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PipelineState {
    queues: HashMap<QueueId, Queue>,
    dispatchers: HashMap<DispatcherId, EventDispatcher>,
}

/// In-memory implementation of the [`PipelineStore`] port, with seed helpers
/// for tests.
#[derive(Clone, Default)]
pub struct InMemoryPipelineStore {
    state: Arc<Mutex<PipelineState>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_queue(&self, queue: Queue) {
        self.state.lock().queues.insert(queue.id, queue);
    }

    pub fn save_dispatcher(&self, dispatcher: EventDispatcher) {
        self.state.lock().dispatchers.insert(dispatcher.id, dispatcher);
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn find_queue_by_slug(
        &self,
        project_id: &ProjectId,
        slug: &str,
    ) -> Result<Option<Queue>, TracelineError> {
        Ok(self
            .state
            .lock()
            .queues
            .values()
            .find(|q| &q.project_id == project_id && q.slug == slug)
            .cloned())
    }

    async fn find_queue(&self, id: &QueueId) -> Result<Option<Queue>, TracelineError> {
        Ok(self.state.lock().queues.get(id).cloned())
    }

    async fn find_dispatcher(
        &self,
        id: &DispatcherId,
    ) -> Result<Option<EventDispatcher>, TracelineError> {
        Ok(self.state.lock().dispatchers.get(id).cloned())
    }

    async fn find_step(&self, id: &StepId) -> Result<Option<PipelineStep>, TracelineError> {
        let state = self.state.lock();
        let from_queues = state
            .queues
            .values()
            .flat_map(|q| &q.steps)
            .find(|s| &s.id == id);
        let from_dispatchers = state
            .dispatchers
            .values()
            .flat_map(|d| &d.steps)
            .find(|s| &s.id == id);
        Ok(from_queues.or(from_dispatchers).cloned())
    }
}

// ---------------------------------------------------------------------------
// Pipeline runs
// ---------------------------------------------------------------------------

/// In-memory implementation of the [`PipelineRunStore`] port.
///
/// Composes the record store and worker queue so each compound operation is
/// a single lock-scope: the in-memory analogue of the SQLite transaction.
#[derive(Clone)]
pub struct InMemoryPipelineRunStore {
    runs: Arc<Mutex<HashMap<RunId, PipelineRun>>>,
    records: InMemoryEventRecordStore,
    queue: InMemoryWorkerQueue,
}

impl InMemoryPipelineRunStore {
    pub fn new(records: InMemoryEventRecordStore, queue: InMemoryWorkerQueue) -> Self {
        Self { runs: Arc::new(Mutex::new(HashMap::new())), records, queue }
    }

    /// Every stored run (test observability).
    pub fn all(&self) -> Vec<PipelineRun> {
        self.runs.lock().values().cloned().collect()
    }
}

#[async_trait]
impl PipelineRunStore for InMemoryPipelineRunStore {
    async fn create(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError> {
        self.runs.lock().insert(run.id, run.clone());
        self.queue.push(job);
        Ok(())
    }

    async fn load(&self, id: &RunId) -> Result<Option<PipelineRun>, TracelineError> {
        Ok(self.runs.lock().get(id).cloned())
    }

    async fn advance(&self, run: &PipelineRun, job: JobRequest) -> Result<(), TracelineError> {
        self.runs.lock().insert(run.id, run.clone());
        self.queue.push(job);
        Ok(())
    }

    async fn finalize_success(
        &self,
        run: &PipelineRun,
        output_event: &EventRecord,
        follow_up: JobRequest,
    ) -> Result<(), TracelineError> {
        InMemoryEventRecordStore::insert_locked(&mut self.records.state.lock(), output_event)?;
        self.runs.lock().insert(run.id, run.clone());
        self.queue.push(follow_up);
        Ok(())
    }

    async fn fail(&self, run: &PipelineRun) -> Result<(), TracelineError> {
        self.runs.lock().insert(run.id, run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_event_query_orders_by_start_time() {
        let store = InMemoryTaskEventStore::new();
        let trace = TraceId::generate();
        let late = TaskEvent::new("run_1", trace.clone(), SpanId::generate(), "late", 200);
        let early = TaskEvent::new("run_1", trace.clone(), SpanId::generate(), "early", 100);
        store.insert_many(&[late, early]).await.unwrap();

        let rows = store.find_by_trace(&trace).await.unwrap();
        assert_eq!(rows[0].message, "early");
        assert_eq!(rows[1].message, "late");
    }

    #[tokio::test]
    async fn test_duplicate_event_record_is_rejected() {
        let store = InMemoryEventRecordStore::new();
        let environment = EnvironmentId::new();
        let record = EventRecord::new("evt", environment, "n", json!({}), "api");
        store.insert(&record).await.unwrap();

        let duplicate = EventRecord::new("evt", environment, "n", json!({}), "api");
        let err = store.insert(&duplicate).await.unwrap_err();
        assert!(matches!(err, TracelineError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_external_account_upsert_returns_existing() {
        let store = InMemoryEventRecordStore::new();
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
    async fn test_find_step_searches_queues_and_dispatchers() {
        use traceline_domain::entities::StepType;

        let store = InMemoryPipelineStore::new();
        let queue_step = PipelineStep::new("qs", StepType::Filter, json!({}));
        let dispatcher_step = PipelineStep::new("ds", StepType::Filter, json!({}));

        store.save_queue(
            Queue::new(ProjectId::new(), "q", "Q").with_steps(vec![queue_step.clone()]),
        );
        store.save_dispatcher(
            EventDispatcher::new(EnvironmentId::new(), "d").with_steps(vec![dispatcher_step.clone()]),
        );

        assert_eq!(store.find_step(&queue_step.id).await.unwrap(), Some(queue_step));
        assert_eq!(store.find_step(&dispatcher_step.id).await.unwrap(), Some(dispatcher_step));
        assert_eq!(store.find_step(&StepId::new()).await.unwrap(), None);
    }
}
