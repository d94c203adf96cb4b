// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Traceline Bootstrap
//!
//! Process entry concerns kept out of the application crate: logging
//! initialization and shutdown coordination (signals, cancellation tokens,
//! grace periods). The service binary composes these around the application
//! services; nothing here knows about spans or pipelines.

pub mod logger;
pub mod shutdown;

pub use logger::init_logging;
pub use shutdown::{wait_for_signal, CancellationToken, ShutdownCoordinator};
