// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Worker Queue
//!
//! Records enqueued jobs with job-key dedup. The real platform hands jobs to
//! a durable worker; this implementation backs tests and embedded use, where
//! the caller drains pending jobs and drives handlers itself.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use traceline_domain::repositories::{JobRequest, WorkerQueue};
use traceline_domain::TracelineError;

#[derive(Default)]
struct QueueState {
    pending: Vec<JobRequest>,
    keys: HashSet<String>,
}

/// In-memory implementation of the [`WorkerQueue`] port.
#[derive(Clone, Default)]
pub struct InMemoryWorkerQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryWorkerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every pending job, releasing their dedup keys.
    pub fn drain(&self) -> Vec<JobRequest> {
        let mut state = self.state.lock();
        state.keys.clear();
        std::mem::take(&mut state.pending)
    }

    /// Pending jobs without consuming them.
    pub fn pending(&self) -> Vec<JobRequest> {
        self.state.lock().pending.clone()
    }

    /// Enqueue honoring job-key dedup; shared with the trait impl so stores
    /// composing this queue can enqueue synchronously inside their own locks.
    pub fn push(&self, job: JobRequest) {
        let mut state = self.state.lock();
        if let Some(key) = &job.job_key {
            if !state.keys.insert(key.clone()) {
                debug!("Deduplicated job {} with key {}", job.name, key);
                return;
            }
        }
        state.pending.push(job);
    }
}

#[async_trait]
impl WorkerQueue for InMemoryWorkerQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<(), TracelineError> {
        self.push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_key_dedup() {
        let queue = InMemoryWorkerQueue::new();
        queue
            .enqueue(JobRequest::new("deliverEvent", serde_json::json!({})).with_job_key("event:1"))
            .await
            .unwrap();
        queue
            .enqueue(JobRequest::new("deliverEvent", serde_json::json!({})).with_job_key("event:1"))
            .await
            .unwrap();
        queue
            .enqueue(JobRequest::new("deliverEvent", serde_json::json!({})).with_job_key("event:2"))
            .await
            .unwrap();

        assert_eq!(queue.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_drain_releases_keys() {
        let queue = InMemoryWorkerQueue::new();
        queue
            .enqueue(JobRequest::new("x", serde_json::json!({})).with_job_key("k"))
            .await
            .unwrap();
        assert_eq!(queue.drain().len(), 1);

        // Same key may be enqueued again once drained.
        queue
            .enqueue(JobRequest::new("x", serde_json::json!({})).with_job_key("k"))
            .await
            .unwrap();
        assert_eq!(queue.pending().len(), 1);
    }
}
