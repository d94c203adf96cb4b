// /////////////////////////////////////////////////////////////////////////////
// Traceline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! Tracing initialization for the process. Installed exactly once, before
//! any component logs; the filter comes from `RUST_LOG` with a sensible
//! default when unset.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,traceline=debug";

/// Installs the global tracing subscriber.
///
/// Safe to call more than once: later calls are no-ops (the first
/// subscriber wins), which keeps tests that share a process happy.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
