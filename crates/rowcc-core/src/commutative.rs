//! Commutative update deferral.
//!
//! `inc_value`/`dec_value` turn a write access into a deferred delta: the
//! entry's conflict kind drops from `Write` to `Commutative` so it stops
//! blocking other reads/commutative ops on the same row, and the delta
//! itself is applied to the row's committed bytes at retire/commit time,
//! under the row's own latch (`COMMUTATIVE_LATCH`), rather than to the
//! access's own working copy.

use crate::access::{Access, AccessType, ComKind, CommutativeOp, RowData};

pub fn inc_value<T: RowData>(access: &mut Access<T>, column: usize, delta: i64) {
    defer(access, ComKind::Inc, column, delta);
}

pub fn dec_value<T: RowData>(access: &mut Access<T>, column: usize, delta: i64) {
    defer(access, ComKind::Dec, column, delta);
}

fn defer<T: RowData>(access: &mut Access<T>, kind: ComKind, column: usize, delta: i64) {
    let op = CommutativeOp { kind, column, delta };
    access.access_type = AccessType::Commutative;
    access.com_op = Some(op);
    if let Some(entry_idx) = access.entry {
        access.row.mark_commutative(entry_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LockType;
    use crate::row::{get_row, Row};
    use crate::timestamp::TsSource;
    use crate::txn::Txn;
    use rowcc_common::config::{CcAlg, RowLockConfig};

    #[derive(Clone)]
    struct Counter(i64);
    impl RowData for Counter {
        fn apply_commutative(&mut self, op: CommutativeOp) {
            match op.kind {
                ComKind::Inc => self.0 += op.delta,
                ComKind::Dec => self.0 -= op.delta,
            }
        }
    }

    #[test]
    fn deferred_increment_applies_at_retire() {
        let row = Row::new(CcAlg::Bamboo, RowLockConfig::default(), Counter(10));
        let mut alloc = TsSource::default().allocator(false, 1);
        let txn = Txn::new(1);
        let (rc, mut access) = get_row(row.clone(), LockType::Exclusive, &txn, &mut alloc);
        assert!(matches!(rc, crate::rc::Rc::Ok));
        inc_value(&mut access, 0, 5);
        assert!(matches!(access.access_type, AccessType::Commutative));
        let entry = access.entry.unwrap();
        row.return_row(
            entry,
            crate::rc::Rc::Ok,
            crate::row::WriteBack::Commutative(access.com_op.unwrap()),
        );
        assert_eq!(row.snapshot().0, 15);
    }
}
