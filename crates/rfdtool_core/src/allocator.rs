//! Sequential identifier allocation rules.
//!
//! # Responsibility
//! - Define how the durable `nextId` counter moves for sequential creates,
//!   imports and startup repair.
//! - Keep the arithmetic in one place so both store backends agree.
//!
//! # Invariants
//! - The counter never retreats.
//! - After any successful mutation the counter exceeds every stored id.
//! - Reads and writes of the counter happen inside the same transaction as
//!   the document write that depends on them.

use crate::model::rfd::RfdId;

/// Outcome of checking a sequential create against the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequentialCheck {
    /// The id matches; the counter advances to the contained value.
    Accept { advance_to: RfdId },
    /// The id is stale or ahead of the counter.
    Conflict { expected: RfdId },
}

/// Counter value for an empty store or a store with no counter record.
pub fn initial_next() -> RfdId {
    RfdId::FIRST
}

/// Validates a sequential create of `id` when the counter is `next`.
pub fn check_sequential(next: RfdId, id: RfdId) -> SequentialCheck {
    if id == next {
        SequentialCheck::Accept {
            advance_to: next.next(),
        }
    } else {
        SequentialCheck::Conflict { expected: next }
    }
}

/// Counter value after importing `imported` when the counter is `next`.
///
/// Returns `None` when the counter does not need to move.
pub fn reconcile_after_import(next: RfdId, imported: RfdId) -> Option<RfdId> {
    if imported >= next {
        Some(imported.next())
    } else {
        None
    }
}

/// Counter value after a full scan found `highest` as the largest stored id.
///
/// Returns `None` when the stored counter is already ahead of the scan.
pub fn reconcile_after_scan(next: RfdId, highest: Option<RfdId>) -> Option<RfdId> {
    let scanned = highest.map_or_else(initial_next, RfdId::next);
    if scanned > next {
        Some(scanned)
    } else {
        None
    }
}
