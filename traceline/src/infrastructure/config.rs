// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Configuration
//!
//! Environment-based configuration for the event repository. Recognized
//! variables:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `EVENTS_BATCH_SIZE` | Flush-scheduler batch size | 100 |
//! | `EVENTS_BATCH_INTERVAL` | Flush-scheduler interval, milliseconds | 1000 |
//! | `EVENTS_DEFAULT_LOG_RETENTION` | Span retention, days | 7 |
//! | `DATABASE_URL` | SQLite connection string | `sqlite::memory:` |
//!
//! Values are validated at load so a misconfigured deployment fails at
//! bootstrap rather than at first use.

use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use traceline_domain::TracelineError;

/// Runtime configuration for the event repository and its flush scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Number of buffered spans that triggers a size-based flush.
    pub batch_size: usize,
    /// Milliseconds after the oldest un-flushed span before a time-based flush.
    pub batch_interval: u64,
    /// Days of span history kept by the retention sweep.
    pub default_log_retention: i64,
    /// SQLite connection string.
    pub database_url: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: 1000,
            default_log_retention: 7,
            database_url: "sqlite::memory:".to_string(),
        }
    }
}

impl EventsConfig {
    /// Loads configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, TracelineError> {
        let defaults = EventsConfig::default();

        let loaded: EventsConfig = Config::builder()
            .set_default("batch_size", defaults.batch_size as i64)
            .and_then(|b| b.set_default("batch_interval", defaults.batch_interval as i64))
            .and_then(|b| b.set_default("default_log_retention", defaults.default_log_retention))
            .and_then(|b| b.set_default("database_url", defaults.database_url.clone()))
            .map_err(|e| TracelineError::ValidationError(format!("Failed to seed config defaults: {}", e)))?
            .add_source(Environment::with_prefix("EVENTS"))
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())
            .map_err(|e| TracelineError::ValidationError(format!("Failed to read DATABASE_URL: {}", e)))?
            .build()
            .map_err(|e| TracelineError::ValidationError(format!("Failed to load configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| TracelineError::ValidationError(format!("Invalid configuration: {}", e)))?;

        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), TracelineError> {
        if self.batch_size == 0 {
            return Err(TracelineError::ValidationError(
                "EVENTS_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.batch_interval == 0 {
            return Err(TracelineError::ValidationError(
                "EVENTS_BATCH_INTERVAL must be at least 1 ms".to_string(),
            ));
        }
        if self.default_log_retention <= 0 {
            return Err(TracelineError::ValidationError(
                "EVENTS_DEFAULT_LOG_RETENTION must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }

    /// The flush interval as a std duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval)
    }

    /// The retention horizon as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.default_log_retention)
    }
}
