// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Process Event Broker
//!
//! Pattern pub/sub inside one process: a registry of subscriptions, each an
//! unbounded channel plus the pattern it watches. A publish walks the
//! registry and delivers to every matching subscription.
//!
//! Patterns use `*` as a full-segment wildcard on `:`-separated channels, so
//! `events:{traceId}:*` matches every span channel of one trace. Teardown is
//! synchronous: the unsubscribe closure removes the registry entry before it
//! returns, after which no further publish can reach the channel.
//!
//! A managed broker (e.g. Redis pub/sub) slots behind the same [`EventBroker`]
//! port without touching callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use tracing::debug;

use traceline_domain::repositories::{BrokerMessage, BrokerSubscription, EventBroker};
use traceline_domain::TracelineError;

struct Registration {
    pattern: String,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

/// In-process implementation of the [`EventBroker`] port.
#[derive(Clone, Default)]
pub struct InMemoryEventBroker {
    registry: Arc<Mutex<HashMap<u64, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryEventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions (test observability).
    pub fn subscription_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Matches a `:`-separated channel against a pattern where `*` stands for
/// exactly one segment.
fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let channel_segments: Vec<&str> = channel.split(':').collect();

    pattern_segments.len() == channel_segments.len()
        && pattern_segments
            .iter()
            .zip(&channel_segments)
            .all(|(p, c)| *p == "*" || p == c)
}

#[async_trait]
impl EventBroker for InMemoryEventBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TracelineError> {
        let mut registry = self.registry.lock();
        // Deliver and drop any subscription whose receiver has gone away.
        registry.retain(|_, registration| {
            if !pattern_matches(&registration.pattern, channel) {
                return true;
            }
            registration
                .sender
                .unbounded_send(BrokerMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BrokerSubscription, TracelineError> {
        let (sender, receiver) = mpsc::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.registry
            .lock()
            .insert(id, Registration { pattern: pattern.to_string(), sender });
        debug!("Opened broker subscription {} on pattern {}", id, pattern);

        let registry = self.registry.clone();
        let unsubscribe = Box::new(move || {
            registry.lock().remove(&id);
        });

        Ok(BrokerSubscription::new(receiver, unsubscribe))
    }
}
