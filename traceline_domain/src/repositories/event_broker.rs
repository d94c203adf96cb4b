// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Broker Interface
//!
//! Port to the pub/sub broker carrying live span updates. Channels follow
//! the `events:{traceId}:{spanId}` naming scheme; subscribers register a
//! pattern (`events:{traceId}:*`) and receive one message per publish that
//! matched it.
//!
//! ## Ordering & Delivery
//!
//! Publishes happen after the corresponding storage write returns, so a
//! notification always refers to persisted state. Delivery is at-least-once
//! from the subscriber's point of view: the same `(traceId, spanId)` pair
//! may be announced repeatedly, and subscribers treat messages as change
//! hints, re-reading from storage for the actual state.
//!
//! ## Lifecycle
//!
//! Each subscription owns one logical broker connection. Teardown is
//! synchronous: `close` removes the pattern registration before returning,
//! and dropping an open subscription tears it down the same way.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use crate::error::TracelineError;

/// A message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// The concrete channel the publish targeted (not the pattern).
    pub channel: String,
    /// ISO-8601 timestamp of the state change.
    pub payload: String,
}

/// Teardown callback invoked exactly once when the subscription closes.
type Unsubscriber = Box<dyn FnOnce() + Send>;

/// A live pattern subscription: a message stream plus its teardown handle.
pub struct BrokerSubscription {
    receiver: mpsc::UnboundedReceiver<BrokerMessage>,
    unsubscribe: Option<Unsubscriber>,
}

impl BrokerSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<BrokerMessage>, unsubscribe: Unsubscriber) -> Self {
        Self { receiver, unsubscribe: Some(unsubscribe) }
    }

    /// Receives the next message; `None` once the subscription is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.next().await
    }

    /// Receives without waiting; `None` when no message is buffered.
    pub fn try_recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.try_next().ok().flatten()
    }

    /// Closes the subscription, removing the broker registration before
    /// returning. Idempotent.
    pub fn close(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.receiver.close();
    }
}

impl Drop for BrokerSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Interface to the pub/sub broker.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Publishes a payload to one concrete channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TracelineError>;

    /// Opens a pattern subscription. `*` matches a whole trailing segment.
    async fn subscribe(&self, pattern: &str) -> Result<BrokerSubscription, TracelineError>;
}

/// Renders the publish channel for one span: `events:{traceId}:{spanId}`.
pub fn span_channel(trace_id: &crate::value_objects::TraceId, span_id: &crate::value_objects::SpanId) -> String {
    format!("events:{}:{}", trace_id, span_id)
}

/// Renders the subscription pattern covering one trace: `events:{traceId}:*`.
pub fn trace_pattern(trace_id: &crate::value_objects::TraceId) -> String {
    format!("events:{}:*", trace_id)
}
