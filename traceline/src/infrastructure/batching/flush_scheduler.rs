// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Dynamic Flush Scheduler
//!
//! Coalesces single-item writes into size/time-bounded batches. Two triggers
//! fire a flush:
//!
//! - **Size**: the buffer reaches `batch_size` items.
//! - **Time**: `flush_interval` has passed since the oldest un-flushed item.
//!
//! ## Guarantees
//!
//! - `add_to_batch` returns immediately; it only takes the buffer lock.
//! - Items flush in insertion order across callers.
//! - Each flush hands the callback at most `batch_size` items, so `N` items
//!   submitted within one interval produce exactly `⌈N/B⌉` invocations.
//! - **Back-pressure**: one worker drives all flushes serially; while the
//!   callback runs, new items accumulate and the next flush waits for the
//!   callback to return. Nothing is dropped on the way in.
//! - **Failure**: a failed callback drops that batch with an error log.
//!   Durability for callers that need it comes from choosing the immediate
//!   write path upstream, not from retries here.
//!
//! The buffer lock is held only for push/drain bookkeeping, never across an
//! await point.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};

use traceline_domain::TracelineError;

/// The async callback invoked once per flushed batch.
pub type FlushCallback<T> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<(), TracelineError>> + Send + Sync>;

struct Pending<T> {
    item: T,
    enqueued_at: Instant,
}

struct SchedulerState<T> {
    buffer: Mutex<VecDeque<Pending<T>>>,
    notify: Notify,
    batch_size: usize,
    flush_interval: Duration,
    shutting_down: AtomicBool,
    flush_in_progress: AtomicBool,
    drained: Notify,
}

/// Size/time-bounded write coalescer. See the module docs for the contract.
pub struct FlushScheduler<T: Send + 'static> {
    state: Arc<SchedulerState<T>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T: Send + 'static> FlushScheduler<T> {
    /// Creates the scheduler and spawns its flush worker on the current
    /// tokio runtime.
    pub fn new(batch_size: usize, flush_interval: Duration, callback: FlushCallback<T>) -> Self {
        let state = Arc::new(SchedulerState {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            batch_size: batch_size.max(1),
            flush_interval,
            shutting_down: AtomicBool::new(false),
            flush_in_progress: AtomicBool::new(false),
            drained: Notify::new(),
        });

        let worker = tokio::spawn(run_worker(state.clone(), callback));

        Self { state, worker: Mutex::new(Some(worker)) }
    }

    /// Buffers one or more items for the next batch. Returns immediately.
    pub fn add_to_batch(&self, items: impl IntoIterator<Item = T>) {
        let now = Instant::now();
        let should_wake = {
            let mut buffer = self.state.buffer.lock();
            let was_empty = buffer.is_empty();
            for item in items {
                buffer.push_back(Pending { item, enqueued_at: now });
            }
            was_empty || buffer.len() >= self.state.batch_size
        };
        // Wake on the first item (the worker must arm the timer) and on the
        // size trigger.
        if should_wake {
            self.state.notify.notify_one();
        }
    }

    /// Number of items currently buffered.
    pub fn pending(&self) -> usize {
        self.state.buffer.lock().len()
    }

    /// Flushes everything still buffered and stops the worker. Used at
    /// shutdown so no accepted item is left behind.
    pub async fn shutdown(&self) {
        self.state.shutting_down.store(true, Ordering::SeqCst);
        self.state.notify.notify_one();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!("Flush worker ended abnormally during shutdown: {}", e);
            }
        }
    }

    /// Waits until the buffer is empty and no flush is in flight. Test and
    /// shutdown helper; production callers rely on the triggers instead.
    pub async fn drained(&self) {
        loop {
            // Register interest before checking, so a notification between
            // the check and the await cannot be lost.
            let notified = self.state.drained.notified();
            let idle = self.state.buffer.lock().is_empty()
                && !self.state.flush_in_progress.load(Ordering::SeqCst);
            if idle {
                return;
            }
            notified.await;
        }
    }
}

async fn run_worker<T: Send + 'static>(state: Arc<SchedulerState<T>>, callback: FlushCallback<T>) {
    loop {
        enum Wake {
            Flush,
            Deadline(Instant),
            Idle,
            Stop,
        }

        let wake = {
            let buffer = state.buffer.lock();
            if buffer.is_empty() {
                if state.shutting_down.load(Ordering::SeqCst) {
                    Wake::Stop
                } else {
                    Wake::Idle
                }
            } else if buffer.len() >= state.batch_size || state.shutting_down.load(Ordering::SeqCst) {
                Wake::Flush
            } else {
                // Oldest item decides the time trigger. Front exists: the
                // buffer is non-empty here.
                match buffer.front() {
                    Some(front) => {
                        let deadline = front.enqueued_at + state.flush_interval;
                        if Instant::now() >= deadline {
                            Wake::Flush
                        } else {
                            Wake::Deadline(deadline)
                        }
                    }
                    None => Wake::Idle,
                }
            }
        };

        match wake {
            Wake::Stop => break,
            Wake::Idle => {
                state.notify.notified().await;
                continue;
            }
            Wake::Deadline(deadline) => {
                tokio::select! {
                    _ = state.notify.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
                continue;
            }
            Wake::Flush => {}
        }

        // Atomic swap of the active buffer slice: at most one batch worth,
        // so the ⌈N/B⌉ invocation count holds.
        let batch: Vec<T> = {
            let mut buffer = state.buffer.lock();
            let take = buffer.len().min(state.batch_size);
            buffer.drain(..take).map(|p| p.item).collect()
        };

        if batch.is_empty() {
            continue;
        }

        let size = batch.len();
        state.flush_in_progress.store(true, Ordering::SeqCst);
        if let Err(e) = (callback)(batch).await {
            // At-most-once best effort: the batch is gone. Durable callers
            // use the immediate path.
            error!("Dropping batch of {} items after flush failure: {}", size, e);
        } else {
            debug!("Flushed batch of {} items", size);
        }
        state.flush_in_progress.store(false, Ordering::SeqCst);
        state.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Batches = Arc<Mutex<Vec<Vec<u32>>>>;

    fn recording_callback(batches: Batches) -> FlushCallback<u32> {
        Arc::new(move |batch| {
            let batches = batches.clone();
            Box::pin(async move {
                batches.lock().push(batch);
                Ok(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_flushes_full_batches() {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let scheduler =
            FlushScheduler::new(3, Duration::from_secs(60), recording_callback(batches.clone()));

        scheduler.add_to_batch([1, 2, 3]);
        scheduler.drained().await;

        let seen = batches.lock().clone();
        assert_eq!(seen, vec![vec![1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_trigger_flushes_partial_batch() {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let scheduler =
            FlushScheduler::new(100, Duration::from_millis(50), recording_callback(batches.clone()));

        scheduler.add_to_batch([7, 8]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.drained().await;

        assert_eq!(batches.lock().clone(), vec![vec![7, 8]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_count_is_ceiling_of_n_over_b() {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let scheduler =
            FlushScheduler::new(10, Duration::from_millis(50), recording_callback(batches.clone()));

        scheduler.add_to_batch(0..25);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.drained().await;

        let seen = batches.lock().clone();
        assert_eq!(seen.len(), 3, "25 items with batch size 10 flush as 3 batches");
        assert_eq!(seen.iter().map(Vec::len).sum::<usize>(), 25);

        // Submission order survives batching.
        let flat: Vec<u32> = seen.into_iter().flatten().collect();
        assert_eq!(flat, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_defers_next_flush_until_callback_returns() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlap_seen = Arc::new(AtomicBool::new(false));
        let release = Arc::new(Notify::new());
        let completed = Arc::new(AtomicUsize::new(0));

        let callback: FlushCallback<u32> = {
            let in_flight = in_flight.clone();
            let overlap_seen = overlap_seen.clone();
            let release = release.clone();
            let completed = completed.clone();
            Arc::new(move |_batch| {
                let in_flight = in_flight.clone();
                let overlap_seen = overlap_seen.clone();
                let release = release.clone();
                let completed = completed.clone();
                Box::pin(async move {
                    if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap_seen.store(true, Ordering::SeqCst);
                    }
                    release.notified().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        let scheduler = FlushScheduler::new(2, Duration::from_millis(10), callback);

        scheduler.add_to_batch([1, 2]);
        tokio::task::yield_now().await;

        // Second batch becomes due while the first callback is blocked.
        scheduler.add_to_batch([3, 4]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        release.notify_one();
        tokio::task::yield_now().await;
        release.notify_one();
        scheduler.drained().await;

        assert!(!overlap_seen.load(Ordering::SeqCst), "flushes must never overlap");
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_dropped_and_scheduler_continues() {
        let delivered: Batches = Arc::new(Mutex::new(Vec::new()));
        let failures_left = Arc::new(AtomicUsize::new(1));

        let callback: FlushCallback<u32> = {
            let delivered = delivered.clone();
            let failures_left = failures_left.clone();
            Arc::new(move |batch| {
                let delivered = delivered.clone();
                let failures_left = failures_left.clone();
                Box::pin(async move {
                    if failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                        return Err(TracelineError::StorageError("injected".to_string()));
                    }
                    delivered.lock().push(batch);
                    Ok(())
                })
            })
        };

        let scheduler = FlushScheduler::new(2, Duration::from_millis(10), callback);

        scheduler.add_to_batch([1, 2]);
        scheduler.drained().await;
        scheduler.add_to_batch([3, 4]);
        scheduler.drained().await;

        assert_eq!(delivered.lock().clone(), vec![vec![3, 4]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_remaining_items() {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let scheduler =
            FlushScheduler::new(100, Duration::from_secs(60), recording_callback(batches.clone()));

        scheduler.add_to_batch([9]);
        scheduler.shutdown().await;

        assert_eq!(batches.lock().clone(), vec![vec![9]]);
    }
}
