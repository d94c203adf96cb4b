// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Trace Assembly
//!
//! Rebuilds a rooted trace from the flat set of span rows sharing one
//! `traceId`, without mutating any stored row. Three derivations happen on
//! the way:
//!
//! 1. **Deduplication**: among rows sharing a `spanId`, a superseding row
//!    (`!isPartial ∨ isCancelled`) wins over a partial; equally eligible
//!    rows resolve to the last-written.
//! 2. **Cancellation propagation**: a partial span below a cancelled
//!    ancestor reports itself cancelled and no longer partial, because no
//!    completion row will ever arrive for it.
//! 3. **Duration override**: such a span's duration runs from its start to
//!    the nearest cancelled ancestor's cancellation event, clamped to zero.
//!
//! Ancestor walks are memoized per assembly and bounded by the span count,
//! so a malformed parent graph (which storage does not prevent) terminates
//! instead of spinning.

use std::collections::HashMap;

use serde_json::Value;

use crate::entities::task_event::{EventStatus, SpanEvent, SpanLink, TaskEvent};
use crate::value_objects::SpanId;

/// One span in an assembled trace, with derived state applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanSummary {
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub message: String,
    pub status: EventStatus,
    pub is_partial: bool,
    pub is_cancelled: bool,
    pub is_error: bool,
    /// Nanoseconds since the Unix epoch.
    pub start_time: i64,
    /// Nanoseconds; derived for cancelled-by-ancestry spans.
    pub duration: i64,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub style: Option<Value>,
    /// Direct children, ordered by start time.
    pub children: Vec<SpanId>,
}

/// An assembled trace: the root plus every span, ordered by start time.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    pub root_span: SpanSummary,
    pub spans: Vec<SpanSummary>,
}

/// Assembles a trace from row projections ordered by `startTime` ascending.
///
/// Returns `None` when the set has no root (no row without a `parentId`):
/// a parentless fragment is not a presentable trace.
pub fn assemble_trace(rows: &[TaskEvent]) -> Option<TraceSummary> {
    let deduped = dedup_rows(rows);
    if deduped.is_empty() {
        return None;
    }

    let index_of: HashMap<SpanId, usize> =
        deduped.iter().enumerate().map(|(i, row)| (row.span_id.clone(), i)).collect();

    // parent edge as an index, resolved once; rows referencing a span that
    // is not in the set keep their parent_id but have no edge to walk.
    let parent_edge: Vec<Option<usize>> = deduped
        .iter()
        .map(|row| row.parent_id.as_ref().and_then(|p| index_of.get(p)).copied())
        .collect();

    let cancelled = derive_cancellation(&deduped, &parent_edge);

    let mut summaries: Vec<SpanSummary> = deduped
        .iter()
        .enumerate()
        .map(|(i, row)| summarize(row, cancelled[i], &deduped, &parent_edge, i))
        .collect();

    // Children ordering: rows are already sorted by start time, so pushing
    // in iteration order keeps each child list sorted.
    for i in 0..summaries.len() {
        if let Some(parent) = parent_edge[i] {
            let child_id = summaries[i].span_id.clone();
            summaries[parent].children.push(child_id);
        }
    }

    let root = summaries.iter().find(|s| s.parent_id.is_none())?.clone();

    Some(TraceSummary { root_span: root, spans: summaries })
}

/// Applies the dedup rule, preserving the start-time ordering of the input.
fn dedup_rows(rows: &[TaskEvent]) -> Vec<TaskEvent> {
    let mut chosen: HashMap<SpanId, TaskEvent> = HashMap::new();
    let mut order: Vec<SpanId> = Vec::new();

    for row in rows {
        match chosen.get(&row.span_id) {
            None => {
                order.push(row.span_id.clone());
                chosen.insert(row.span_id.clone(), row.clone());
            }
            Some(existing) => {
                let replaces = if row.supersedes_partial() == existing.supersedes_partial() {
                    // Equally eligible: last-written wins.
                    row.created_at >= existing.created_at
                } else {
                    row.supersedes_partial()
                };
                if replaces {
                    chosen.insert(row.span_id.clone(), row.clone());
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| chosen.remove(&id))
        .collect()
}

/// Computes `ancestorCancelled` for every span: the span itself or any
/// ancestor carries the cancelled flag. Memoized; each walk is bounded by
/// the span count to tolerate malformed parent graphs.
fn derive_cancellation(rows: &[TaskEvent], parent_edge: &[Option<usize>]) -> Vec<bool> {
    let mut memo: Vec<Option<bool>> = vec![None; rows.len()];

    for start in 0..rows.len() {
        if memo[start].is_some() {
            continue;
        }

        let mut path = Vec::new();
        let mut cursor = Some(start);
        let mut result = false;
        let mut hops = 0;

        while let Some(i) = cursor {
            if let Some(known) = memo[i] {
                result = known;
                break;
            }
            if rows[i].is_cancelled {
                path.push(i);
                result = true;
                break;
            }
            path.push(i);
            hops += 1;
            if hops > rows.len() {
                // Cycle in a malformed input; treat the remainder as not cancelled.
                break;
            }
            cursor = parent_edge[i];
        }

        for i in path {
            memo[i] = Some(result);
        }
    }

    memo.into_iter().map(|m| m.unwrap_or(false)).collect()
}

fn summarize(
    row: &TaskEvent,
    ancestor_cancelled: bool,
    rows: &[TaskEvent],
    parent_edge: &[Option<usize>],
    index: usize,
) -> SpanSummary {
    let is_cancelled = row.is_cancelled || (row.is_partial && ancestor_cancelled);
    let is_partial = row.is_partial && !ancestor_cancelled;

    let duration = if row.is_partial && ancestor_cancelled {
        nearest_cancellation_time(rows, parent_edge, index)
            .map(|t| (t - row.start_time).max(0))
            .unwrap_or(row.duration)
    } else {
        row.duration
    };

    SpanSummary {
        span_id: row.span_id.clone(),
        parent_id: row.parent_id.clone(),
        message: row.message.clone(),
        status: row.status,
        is_partial,
        is_cancelled,
        is_error: row.is_error,
        start_time: row.start_time,
        duration,
        events: row.events.clone(),
        links: row.links.clone(),
        style: row.style.clone(),
        children: Vec::new(),
    }
}

/// Walks from a span towards the root and returns the cancellation-event
/// time of the nearest cancelled span (the span itself included).
fn nearest_cancellation_time(rows: &[TaskEvent], parent_edge: &[Option<usize>], start: usize) -> Option<i64> {
    let mut cursor = Some(start);
    let mut hops = 0;

    while let Some(i) = cursor {
        if rows[i].is_cancelled {
            return rows[i].cancellation_time();
        }
        hops += 1;
        if hops > rows.len() {
            return None;
        }
        cursor = parent_edge[i];
    }
    None
}
