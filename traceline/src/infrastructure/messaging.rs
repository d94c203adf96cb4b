// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Messaging Adapters
//!
//! In-process implementations of the broker and worker-queue ports. The
//! SQLite outbox queue lives with the other SQLite adapters in
//! `repositories`.

pub mod memory_broker;
pub mod memory_queue;

pub use memory_broker::InMemoryEventBroker;
pub use memory_queue::InMemoryWorkerQueue;
