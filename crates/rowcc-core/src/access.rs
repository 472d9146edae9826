//! Per-(transaction, row) access record and the row payload contract.

use std::sync::Arc;

use crate::row::Row;
use crate::slab::EntryIdx;

/// The contract a row's payload type must satisfy. Table/index storage
/// itself is out of scope for this core; this trait is the seam it
/// calls through to read and write a row's bytes.
pub trait RowData: Clone + Send + Sync + 'static {
    /// Apply a deferred commutative delta in place.
    fn apply_commutative(&mut self, op: CommutativeOp);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    /// Aborted write; `cleanup` rolls the row back via `orig_data`.
    RolledBackWrite,
    Commutative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComKind {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy)]
pub struct CommutativeOp {
    pub kind: ComKind,
    pub column: usize,
    pub delta: i64,
}

pub struct Access<T: RowData> {
    pub row: Arc<Row<T>>,
    pub data: T,
    pub access_type: AccessType,
    pub entry: Option<EntryIdx>,
    pub com_op: Option<CommutativeOp>,
}

impl<T: RowData> Access<T> {
    #[must_use]
    pub fn new(row: Arc<Row<T>>, data: T, access_type: AccessType) -> Self {
        Self {
            row,
            data,
            access_type,
            entry: None,
            com_op: None,
        }
    }
}
