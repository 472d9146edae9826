//! Per-transaction access list and commit/cleanup orchestration.
//! Generic over the row payload type, unlike `Txn`, since
//! it owns `Access<T>` — never touched by a thread other than its owner.

use std::sync::Arc;
use std::time::Instant;

use rowcc_common::config::RowLockConfig;

use crate::access::{Access, AccessType};
use crate::entry::LockType;
use crate::rc::Rc;
use crate::row::{get_row, Row, WriteBack};
use crate::timestamp::TsAllocator;
use crate::txn::{Txn, TxnId};
use crate::RowData;

/// Owns a fixed-capacity ordered list of row accesses, in acquisition
/// order. `cleanup` walks it in reverse, matching the original's LIFO
/// unwind.
pub struct Transaction<T: RowData> {
    pub txn: Arc<Txn>,
    accesses: Vec<Access<T>>,
    retired_early: Vec<bool>,
    max_row_per_txn: usize,
}

impl<T: RowData> Transaction<T> {
    #[must_use]
    pub fn new(id: TxnId, max_row_per_txn: usize) -> Self {
        Self {
            txn: Txn::new(id),
            accesses: Vec::with_capacity(max_row_per_txn.min(64)),
            retired_early: Vec::with_capacity(max_row_per_txn.min(64)),
            max_row_per_txn,
        }
    }

    #[must_use]
    pub fn id(&self) -> TxnId {
        self.txn.id
    }

    /// Acquire a lock on `row`, recording the access on success.
    /// Returns `None` on ABORT (the caller's transaction is already
    /// marked aborted at that point).
    pub fn get_row(
        &mut self,
        row: Arc<Row<T>>,
        lock_type: LockType,
        alloc: &mut TsAllocator,
    ) -> Option<&mut Access<T>> {
        assert!(
            self.accesses.len() < self.max_row_per_txn,
            "MAX_ROW_PER_TXN exceeded"
        );
        let (rc, mut access) = get_row(row, lock_type, &self.txn, alloc);
        if rc.is_abort() {
            self.txn.abort_self();
            return None;
        }
        if rc == Rc::Wait {
            let entry_idx = access.entry.expect("Wait outcome always carries an entry");
            let row = access.row.clone();
            match row.resolve_wait(entry_idx, &self.txn) {
                Some(data) => access.data = data,
                None => {
                    row.return_row(entry_idx, Rc::Abort, WriteBack::None);
                    self.txn.abort_self();
                    return None;
                }
            }
        }
        self.accesses.push(access);
        self.retired_early.push(false);
        self.accesses.last_mut()
    }

    /// For a voluntary/application abort, sets ABORTED directly;
    /// otherwise enters the commit spin with the late-retire heuristic,
    /// then unwinds via `cleanup` either way. Returns whether the
    /// transaction committed.
    pub fn finish(&mut self, rc: Rc, cfg: &RowLockConfig) -> bool {
        let committed = if rc.is_abort() {
            self.txn.abort_self();
            false
        } else {
            self.commit_spin_with_late_retire(cfg)
        };
        self.cleanup(if committed { Rc::Ok } else { Rc::Abort });
        committed
    }

    /// Late retire: once the commit spin has
    /// run for longer than `g_last_retire` times the transaction's
    /// elapsed lifetime, eagerly retire remaining owned write entries —
    /// trading serial latency (their successors can now proceed) for
    /// more cascade surface if this transaction ends up wounded anyway.
    fn commit_spin_with_late_retire(&mut self, cfg: &RowLockConfig) -> bool {
        let spin_start = Instant::now();
        let started_at = self.txn.started_at;
        let threshold = cfg.g_last_retire;
        let accesses = &mut self.accesses;
        let retired_early = &mut self.retired_early;
        self.txn.commit_spin(|| {
            if threshold <= 0.0 {
                return;
            }
            let lifetime = started_at.elapsed().as_secs_f64();
            if lifetime <= 0.0 {
                return;
            }
            if spin_start.elapsed().as_secs_f64() / lifetime < threshold {
                return;
            }
            for (i, access) in accesses.iter().enumerate() {
                if retired_early[i] {
                    continue;
                }
                if !matches!(access.access_type, AccessType::Write) {
                    continue;
                }
                let Some(entry) = access.entry else { continue };
                access
                    .row
                    .retire_row(entry, WriteBack::Replace(access.data.clone()));
                retired_early[i] = true;
            }
        })
    }

    /// Release every access in reverse acquisition order, applying
    /// the outcome's write-back.
    fn cleanup(&mut self, rc: Rc) {
        while let Some(access) = self.accesses.pop() {
            let already_retired = self.retired_early.pop().unwrap_or(false);
            let Some(entry) = access.entry else { continue };
            let write_back = match (access.access_type, rc.is_abort()) {
                (_, true) => WriteBack::None,
                // Late retire already applied this write's post-image to
                // the row; re-applying here would be a redundant (if
                // idempotent) second `Replace` — skip it.
                (AccessType::Write, false) if already_retired => WriteBack::None,
                (AccessType::Write, false) => WriteBack::Replace(access.data),
                (AccessType::Commutative, false) => {
                    WriteBack::Commutative(access.com_op.expect("commutative access without op"))
                }
                (AccessType::Read | AccessType::RolledBackWrite, false) => WriteBack::None,
            };
            access.row.return_row(entry, rc, write_back);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::CommutativeOp;
    use crate::timestamp::TsSource;
    use rowcc_common::config::CcAlg;

    #[derive(Clone, PartialEq, Debug)]
    struct Cell(i64);
    impl RowData for Cell {
        fn apply_commutative(&mut self, op: CommutativeOp) {
            match op.kind {
                crate::access::ComKind::Inc => self.0 += op.delta,
                crate::access::ComKind::Dec => self.0 -= op.delta,
            }
        }
    }

    fn cfg() -> RowLockConfig {
        RowLockConfig::default()
    }

    #[test]
    fn pure_reads_commit_immediately_with_no_barriers() {
        let row = Row::new(CcAlg::Bamboo, cfg(), Cell(1));
        let src = TsSource::new();
        let mut alloc = src.allocator(false, 1);

        let mut t1 = Transaction::<Cell>::new(1, 8);
        let a1 = t1.get_row(row.clone(), LockType::Shared, &mut alloc).unwrap();
        assert_eq!(a1.data, Cell(1));
        assert!(t1.finish(Rc::Ok, &cfg()));

        let mut t2 = Transaction::<Cell>::new(2, 8);
        let a2 = t2.get_row(row.clone(), LockType::Shared, &mut alloc).unwrap();
        assert_eq!(a2.data, Cell(1));
        assert!(t2.finish(Rc::Ok, &cfg()));
    }

    #[test]
    fn write_commits_and_is_visible_to_later_reader() {
        let row = Row::new(CcAlg::Bamboo, cfg(), Cell(0));
        let src = TsSource::new();
        let mut alloc = src.allocator(false, 1);

        let mut writer = Transaction::<Cell>::new(1, 8);
        let access = writer
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Cell(42);
        assert!(writer.finish(Rc::Ok, &cfg()));
        assert_eq!(row.snapshot(), Cell(42));

        let mut reader = Transaction::<Cell>::new(2, 8);
        let access = reader
            .get_row(row.clone(), LockType::Shared, &mut alloc)
            .unwrap();
        assert_eq!(access.data, Cell(42));
        assert!(reader.finish(Rc::Ok, &cfg()));
    }

    #[test]
    fn second_writer_after_committed_write_does_not_block_on_a_stale_predecessor() {
        let row = Row::new(CcAlg::Bamboo, cfg(), Cell(0));
        let src = TsSource::new();
        let mut alloc = src.allocator(false, 1);

        let mut t1 = Transaction::<Cell>::new(1, 8);
        let access = t1
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Cell(1);
        assert!(t1.finish(Rc::Ok, &cfg()));
        assert_eq!(row.snapshot(), Cell(1));

        // A committed owner must be removed outright, not left sitting in
        // the retired list: otherwise this second writer inherits a
        // barrier against a predecessor whose commit will never fire
        // again, and its own `finish` spins forever.
        let mut t2 = Transaction::<Cell>::new(2, 8);
        let access = t2
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Cell(2);
        assert!(t2.finish(Rc::Ok, &cfg()));
        assert_eq!(row.snapshot(), Cell(2));
    }

    #[test]
    fn younger_writer_wounds_older_owner_which_then_aborts() {
        let row = Row::new(CcAlg::Bamboo, cfg(), Cell(0));
        let src = TsSource::new();
        let mut alloc = src.allocator(false, 1);

        let mut t1 = Transaction::<Cell>::new(1, 8);
        let access = t1
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Cell(7);
        // Force T1's timestamp older than T2's forthcoming wound check by
        // assigning it a large value directly would require internal
        // access; instead exercise the actual wound path: T2 arrives
        // while T1 still owns, and since T1's ts is unassigned (0) at
        // this point the exclusive path treats it as stale and wounds it.
        let mut t2 = Transaction::<Cell>::new(2, 8);
        {
            let access = t2
                .get_row(row.clone(), LockType::Exclusive, &mut alloc)
                .expect("T2 should wound T1 and become owner");
            access.data = Cell(9);
        }

        assert!(t1.txn.is_aborted());
        assert!(!t1.finish(Rc::Ok, &cfg()));
        assert_eq!(row.snapshot(), Cell(0), "T1's write must be rolled back");

        assert!(t2.finish(Rc::Ok, &cfg()));
        assert_eq!(row.snapshot(), Cell(9));
    }
}
