//! Transaction core state: identity, timestamp, status, and the
//! three-valued commit-barrier word.
//!
//! `Txn` holds only what other threads need to observe lock-free under
//! wound (status, lock_abort, commit_barriers) or read-mostly (ts). The
//! per-transaction access list lives one layer up, in `Transaction<T>`
//! (`manager.rs`), since it is generic over the row payload type and is
//! never touched by any thread but its owner.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::timestamp::TsAllocator;

pub type TxnId = u64;

/// Bit 63: cascading wound sets this without disturbing the barrier count.
const BARRIER_ABORTED: u64 = 1 << 63;
/// A count value no real transaction can reach (MAX_ROW_PER_TXN bounds the
/// count far below this); used purely as a CAS target, not an arithmetic
/// value — the CAS `0 -> BARRIER_COMMITTED` is the sole commit decision
/// point.
const BARRIER_COMMITTED: u64 = 1 << 62;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnStatus {
    Running = 0,
    Committed = 1,
    Aborted = 2,
}

pub struct Txn {
    pub id: TxnId,
    ts: AtomicU64,
    status: AtomicU8,
    /// Set when a waiter is promoted to owner; the worker loop polls this
    /// rather than cooperatively yielding.
    pub lock_ready: AtomicBool,
    /// Set by a successful wound; checked by the victim's own thread the
    /// next time it calls `get_row`.
    pub lock_abort: AtomicBool,
    commit_barriers: AtomicU64,
    pub started_at: Instant,
}

impl Txn {
    #[must_use]
    pub fn new(id: TxnId) -> Arc<Self> {
        Arc::new(Self {
            id,
            ts: AtomicU64::new(0),
            status: AtomicU8::new(TxnStatus::Running as u8),
            lock_ready: AtomicBool::new(false),
            lock_abort: AtomicBool::new(false),
            commit_barriers: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    #[must_use]
    pub fn get_ts(&self) -> u64 {
        self.ts.load(Ordering::Acquire)
    }

    /// "Set if zero" — the linearization point for lazy timestamp
    /// assignment.
    pub fn try_assign_ts(&self, candidate: u64) -> bool {
        self.ts
            .compare_exchange(0, candidate, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reserve `n` ticks from `alloc` and attempt to bind the first to
    /// this transaction. If another assignment already won the race, the
    /// reserved ticks are simply discarded and this transaction's
    /// existing timestamp is returned.
    pub fn set_next_ts(&self, alloc: &mut TsAllocator, n: u64) -> u64 {
        let first = alloc.reserve(n);
        if self.try_assign_ts(first) {
            first
        } else {
            self.get_ts()
        }
    }

    #[must_use]
    pub fn status(&self) -> TxnStatus {
        match self.status.load(Ordering::Acquire) {
            0 => TxnStatus::Running,
            1 => TxnStatus::Committed,
            _ => TxnStatus::Aborted,
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self.status(), TxnStatus::Aborted)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.status(), TxnStatus::Running)
    }

    /// Attempt to wound this transaction: CAS RUNNING -> ABORTED. Returns
    /// `true` only if this call performed the transition — the caller is
    /// then the one responsible for cascading removal of this entry's
    /// retired descendants. If this returns `false` because the victim is
    /// already `Committed`, the wounder must abort itself instead.
    pub fn try_wound(&self) -> bool {
        let won = self
            .status
            .compare_exchange(
                TxnStatus::Running as u8,
                TxnStatus::Aborted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.lock_abort.store(true, Ordering::Release);
            self.commit_barriers
                .fetch_or(BARRIER_ABORTED, Ordering::AcqRel);
        }
        won
    }

    pub fn add_barrier(&self) {
        self.commit_barriers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_barrier(&self) {
        self.commit_barriers.fetch_sub(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn barriers_aborted(&self) -> bool {
        self.commit_barriers.load(Ordering::Acquire) & BARRIER_ABORTED != 0
    }

    fn try_commit_cas(&self) -> bool {
        self.commit_barriers
            .compare_exchange(0, BARRIER_COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Spin until the barrier count reaches zero (commit) or the ABORTED
    /// bit is observed. `on_spin` is called once per iteration — the
    /// worker loop uses it to drive the late-retire heuristic. Returns
    /// `true` on commit.
    pub fn commit_spin(&self, mut on_spin: impl FnMut()) -> bool {
        loop {
            if self.try_commit_cas() {
                self.status
                    .store(TxnStatus::Committed as u8, Ordering::Release);
                return true;
            }
            if self.barriers_aborted() {
                self.status
                    .store(TxnStatus::Aborted as u8, Ordering::Release);
                self.lock_abort.store(true, Ordering::Release);
                return false;
            }
            std::hint::spin_loop();
            on_spin();
        }
    }

    /// Used by the exclusive-acquisition path: a transaction that has not
    /// yet entered commit-spin can self-abort directly (e.g. waiter cap
    /// exceeded) without going through the wound CAS.
    pub fn abort_self(&self) {
        self.status
            .store(TxnStatus::Aborted as u8, Ordering::Release);
        self.lock_abort.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_with_no_barriers_succeeds_immediately() {
        let t = Txn::new(1);
        assert!(t.commit_spin(|| {}));
        assert_eq!(t.status(), TxnStatus::Committed);
    }

    #[test]
    fn wound_blocks_commit() {
        let t = Txn::new(1);
        t.add_barrier();
        assert!(t.try_wound());
        assert!(!t.commit_spin(|| {}));
        assert_eq!(t.status(), TxnStatus::Aborted);
    }

    #[test]
    fn cannot_wound_twice() {
        let t = Txn::new(1);
        assert!(t.try_wound());
        assert!(!t.try_wound());
    }

    #[test]
    fn cannot_wound_committed() {
        let t = Txn::new(1);
        assert!(t.commit_spin(|| {}));
        assert!(!t.try_wound());
    }

    #[test]
    fn removing_last_barrier_unblocks_commit() {
        let t = Txn::new(1);
        t.add_barrier();
        t.remove_barrier();
        assert!(t.commit_spin(|| {}));
    }
}
