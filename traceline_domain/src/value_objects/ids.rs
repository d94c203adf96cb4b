// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Typed Entity Identifiers
//!
//! UUID-backed identifier newtypes for every entity in the system. Typed ids
//! prevent an `EventRecordId` from being passed where a `QueueId` is
//! expected; the compiler enforces what a bare `Uuid` cannot.
//!
//! ## Design Principles
//!
//! - **Type Safety**: Each entity gets its own id type
//! - **Zero Cost**: Newtypes compile away; storage is a single `Uuid`
//! - **Interop**: `Display`/`FromStr`/serde round-trip through the canonical
//!   hyphenated UUID form

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TracelineError;

/// Declares a UUID-backed identifier newtype with the standard trait surface.
macro_rules! entity_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = TracelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    TracelineError::ValidationError(format!(
                        concat!("Invalid ", stringify!($name), ": {}"),
                        e
                    ))
                })
            }
        }
    };
}

entity_id! {
    /// Surrogate row identifier for a span (`TaskEvent`) row.
    TaskEventId
}

entity_id! {
    /// Surrogate identifier for an inbound event record.
    EventRecordId
}

entity_id! {
    /// Identifier for one pipeline run (one execution of a step list).
    RunId
}

entity_id! {
    /// Identifier for a queue (project-scoped, addressed by `(projectId, slug)`).
    QueueId
}

entity_id! {
    /// Identifier for an event dispatcher.
    DispatcherId
}

entity_id! {
    /// Identifier for a single pipeline step definition.
    StepId
}

entity_id! {
    /// Identifier for an environment (tenancy scope for event records).
    EnvironmentId
}

entity_id! {
    /// Identifier for a project (tenancy scope for queues).
    ProjectId
}

entity_id! {
    /// Identifier for an external account attached to inbound events.
    ExternalAccountId
}
