// /////////////////////////////////////////////////////////////////////////////
// Traceline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the error system for the traceline domain. Errors are
//! categorized by failure mode, carry actionable messages, and integrate with
//! the standard library and third-party errors at the adapter boundary.
//!
//! ## Error Categories
//!
//! ### Pipeline Errors
//! - **InvalidFilter**: Filter configuration rejected by the schema
//! - **FilterMismatch**: Payload did not satisfy a pipeline step's filter
//! - **UnsupportedStep**: Pipeline step type with no executor
//!
//! ### Domain Errors
//! - **MissingEntity**: Referenced queue, dispatcher, or event not found
//! - **MissingRunId**: Span synthesis attempted without a run id
//! - **DuplicateKey**: Unique constraint violation surfaced by storage
//!
//! ### Infrastructure Errors
//! - **StorageError**: Database operation failures
//! - **BrokerError**: Pub/sub broker failures
//! - **SerializationError**: JSON encode/decode failures
//! - **TimeoutError**: Operation exceeded its bound (e.g. the 10 s
//!   transaction budget)
//!
//! ## Propagation Rules
//!
//! Callers of the public API see domain errors. The pipeline engine converts
//! step-level failures into a persistent `FAILURE` run with a formatted error
//! string; no error escapes a pipeline step. Scheduled-batch storage failures
//! are logged and dropped; immediate-path failures propagate to the caller.

use thiserror::Error;

/// Domain-specific errors for the traceline event repository.
///
/// Each variant represents a specific failure mode and includes a descriptive
/// message with enough context for debugging. Variants are cloneable so they
/// can be recorded on persistent rows (pipeline run failures) and logged
/// without losing the original.
#[derive(Error, Debug, Clone)]
pub enum TracelineError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Data does not match filter")]
    FilterMismatch,

    #[error("Unsupported step type: {0}")]
    UnsupportedStep(String),

    #[error("Missing entity: {0}")]
    MissingEntity(String),

    #[error("Missing run id: {0}")]
    MissingRunId(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TracelineError {
    /// Returns the error category for metrics and logging.
    ///
    /// Categories group variants by failure mode so dashboards can aggregate
    /// without enumerating every variant.
    pub fn category(&self) -> &'static str {
        match self {
            TracelineError::InvalidFilter(_)
            | TracelineError::FilterMismatch
            | TracelineError::UnsupportedStep(_) => "pipeline",
            TracelineError::MissingEntity(_)
            | TracelineError::MissingRunId(_)
            | TracelineError::DuplicateKey(_) => "domain",
            TracelineError::StorageError(_)
            | TracelineError::BrokerError(_)
            | TracelineError::TimeoutError(_) => "infrastructure",
            TracelineError::SerializationError(_) | TracelineError::ValidationError(_) => "data",
            TracelineError::InternalError(_) => "internal",
        }
    }

    /// True for errors that indicate a transient condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TracelineError::StorageError(_)
                | TracelineError::BrokerError(_)
                | TracelineError::TimeoutError(_)
        )
    }
}

impl From<serde_json::Error> for TracelineError {
    fn from(err: serde_json::Error) -> Self {
        TracelineError::SerializationError(err.to_string())
    }
}
