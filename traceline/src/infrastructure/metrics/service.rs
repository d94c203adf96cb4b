// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Service Implementation
//!
//! Prometheus-based metrics collection for the event repository: ingestion
//! counters, flush-scheduler batch outcomes, live trace-subscriber gauge,
//! and terminal pipeline-run statuses. Thread-safe with low overhead;
//! recording a metric never fails the operation being measured.

use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use traceline_domain::TracelineError;

/// Prometheus metrics service for the event repository.
///
/// Owns the registry and the instrument handles. Clones share the same
/// underlying instruments, so one service is created at bootstrap and handed
/// to every component that records.
#[derive(Clone)]
pub struct MetricsService {
    registry: Arc<Registry>,

    // Ingestion metrics
    events_ingested_total: IntCounter,
    batches_flushed_total: IntCounter,
    batches_dropped_total: IntCounter,

    // Live subscription metrics
    trace_subscribers: IntGauge,

    // Pipeline metrics
    pipeline_runs_total: IntCounterVec,
}

impl MetricsService {
    /// Creates the service with a fresh registry.
    pub fn new() -> Result<Self, TracelineError> {
        let registry = Registry::new();

        let events_ingested_total = IntCounter::with_opts(
            Opts::new("events_ingested_total", "Total span rows accepted for persistence")
                .namespace("traceline"),
        )
        .map_err(|e| TracelineError::InternalError(format!("Failed to create events_ingested_total: {}", e)))?;

        let batches_flushed_total = IntCounter::with_opts(
            Opts::new("events_batches_flushed_total", "Flush-scheduler batches written to storage")
                .namespace("traceline"),
        )
        .map_err(|e| TracelineError::InternalError(format!("Failed to create batches_flushed_total: {}", e)))?;

        let batches_dropped_total = IntCounter::with_opts(
            Opts::new("events_batches_dropped_total", "Flush-scheduler batches dropped after a storage failure")
                .namespace("traceline"),
        )
        .map_err(|e| TracelineError::InternalError(format!("Failed to create batches_dropped_total: {}", e)))?;

        let trace_subscribers = IntGauge::with_opts(
            Opts::new("trace_subscribers", "Live trace subscriptions currently open")
                .namespace("traceline"),
        )
        .map_err(|e| TracelineError::InternalError(format!("Failed to create trace_subscribers: {}", e)))?;

        let pipeline_runs_total = IntCounterVec::new(
            Opts::new("pipeline_runs_total", "Pipeline runs reaching a terminal status")
                .namespace("traceline"),
            &["status"],
        )
        .map_err(|e| TracelineError::InternalError(format!("Failed to create pipeline_runs_total: {}", e)))?;

        for instrument in [
            Box::new(events_ingested_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(batches_flushed_total.clone()),
            Box::new(batches_dropped_total.clone()),
            Box::new(trace_subscribers.clone()),
            Box::new(pipeline_runs_total.clone()),
        ] {
            registry
                .register(instrument)
                .map_err(|e| TracelineError::InternalError(format!("Failed to register metric: {}", e)))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            events_ingested_total,
            batches_flushed_total,
            batches_dropped_total,
            trace_subscribers,
            pipeline_runs_total,
        })
    }

    /// The registry, for exposition endpoints.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_events_ingested(&self, count: usize) {
        self.events_ingested_total.inc_by(count as u64);
    }

    pub fn record_batch_flushed(&self) {
        self.batches_flushed_total.inc();
    }

    pub fn record_batch_dropped(&self) {
        self.batches_dropped_total.inc();
    }

    pub fn subscriber_opened(&self) {
        self.trace_subscribers.inc();
    }

    pub fn subscriber_closed(&self) {
        self.trace_subscribers.dec();
    }

    pub fn current_subscribers(&self) -> i64 {
        self.trace_subscribers.get()
    }

    pub fn record_pipeline_run(&self, status: &str) {
        self.pipeline_runs_total.with_label_values(&[status]).inc();
    }

    /// Prometheus text exposition of every registered instrument.
    pub fn get_metrics(&self) -> Result<String, TracelineError> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| TracelineError::InternalError(format!("Failed to encode metrics: {}", e)))
    }
}
