//! A row lock entry: the node that moves between a row's waiter, owner
//! and retired lists.

use std::sync::Arc;

use crate::slab::EntryIdx;
use crate::txn::Txn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Waiter,
    Owner,
    Retired,
}

/// The conflict-relevant "kind" of a retired/owner entry. Distinct from
/// `LockType`: a commutative op downgrades a write entry's kind without
/// changing the lock type it was acquired under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Read,
    Write,
    Commutative,
}

/// Conflict matrix: write conflicts with everything; read/read and any
/// pairing involving a commutative op (other than against a write) do not
/// conflict.
#[inline]
#[must_use]
pub fn kind_conflict(a: EntryKind, b: EntryKind) -> bool {
    matches!(
        (a, b),
        (EntryKind::Write, _) | (_, EntryKind::Write)
    )
}

pub struct Entry<T> {
    pub txn: Arc<Txn>,
    pub lock_type: LockType,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub is_cohead: bool,
    pub delta: bool,
    pub prev: Option<EntryIdx>,
    pub next: Option<EntryIdx>,
    /// Pre-image captured at acquisition time. Populated only for
    /// exclusive (write) entries; RAW successors read this under the row
    /// latch to observe the writer's value without waiting.
    pub orig_data: Option<T>,
}

impl<T> Entry<T> {
    #[must_use]
    pub fn new(txn: Arc<Txn>, lock_type: LockType, orig_data: Option<T>) -> Self {
        let kind = match lock_type {
            LockType::Shared => EntryKind::Read,
            LockType::Exclusive => EntryKind::Write,
        };
        Self {
            txn,
            lock_type,
            kind,
            status: EntryStatus::Waiter,
            is_cohead: false,
            delta: false,
            prev: None,
            next: None,
            orig_data,
        }
    }
}
