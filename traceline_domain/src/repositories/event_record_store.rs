// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Record Store Interface
//!
//! Storage port for inbound event records and the external accounts ingest
//! attaches to them. `(eventId, environmentId)` is unique; implementations
//! surface a constraint violation as `DuplicateKey` so ingest can
//! distinguish a racing duplicate from an infrastructure failure.

use async_trait::async_trait;

use crate::entities::{EventRecord, ExternalAccount};
use crate::error::TracelineError;
use crate::value_objects::{EnvironmentId, EventRecordId};

/// Repository interface for event-record persistence.
#[async_trait]
pub trait EventRecordStore: Send + Sync {
    /// Inserts a new record. Fails with `DuplicateKey` when
    /// `(eventId, environmentId)` already exists.
    async fn insert(&self, record: &EventRecord) -> Result<(), TracelineError>;

    /// Looks up a record by surrogate id.
    async fn find_by_id(&self, id: &EventRecordId) -> Result<Option<EventRecord>, TracelineError>;

    /// Looks up a record by its client-supplied identity.
    async fn find_by_event_id(
        &self,
        environment_id: &EnvironmentId,
        event_id: &str,
    ) -> Result<Option<EventRecord>, TracelineError>;

    /// Persists an update made inside the deliverable window (payload,
    /// context, queue, deliver-at).
    async fn update(&self, record: &EventRecord) -> Result<(), TracelineError>;

    /// Upserts an external account keyed by `(environmentId, identifier)`,
    /// returning the stored row.
    async fn upsert_external_account(
        &self,
        account: &ExternalAccount,
    ) -> Result<ExternalAccount, TracelineError>;
}
