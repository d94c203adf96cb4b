// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Write Batching
//!
//! The dynamic flush scheduler coalescing single-item span writes into
//! size/time-bounded batches.

pub mod flush_scheduler;

pub use flush_scheduler::{FlushCallback, FlushScheduler};
