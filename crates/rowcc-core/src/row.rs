//! Row lock state shared by the BAMBOO and CLV managers: the three
//! doubly-linked lists (waiters/owners/retired) over a per-row slab, and
//! the barrier-graph bookkeeping that is identical across both variants.
//!
//! Dispatch between BAMBOO and CLV is a tag match at construction, not a
//! trait object: no runtime vtable in the hot path.

use parking_lot::Mutex;
use rowcc_common::config::{CcAlg, RowLockConfig};

use crate::access::{Access, CommutativeOp, RowData};
use crate::entry::{kind_conflict, Entry, EntryKind, EntryStatus, LockType};
use crate::manager::{bamboo, clv};
use crate::rc::Rc;
use crate::slab::{EntryIdx, Slab};
use crate::timestamp::TsAllocator;
use crate::txn::Txn;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Default)]
pub struct ListHandle {
    pub head: Option<EntryIdx>,
    pub tail: Option<EntryIdx>,
    pub count: u32,
}

pub fn push_back<T>(entries: &mut Slab<Entry<T>>, list: &mut ListHandle, idx: EntryIdx) {
    entries.get_mut(idx).prev = list.tail;
    entries.get_mut(idx).next = None;
    match list.tail {
        Some(tail) => entries.get_mut(tail).next = Some(idx),
        None => list.head = Some(idx),
    }
    list.tail = Some(idx);
    list.count += 1;
}

pub fn insert_before<T>(
    entries: &mut Slab<Entry<T>>,
    list: &mut ListHandle,
    target: EntryIdx,
    idx: EntryIdx,
) {
    let prev = entries.get(target).prev;
    entries.get_mut(idx).prev = prev;
    entries.get_mut(idx).next = Some(target);
    entries.get_mut(target).prev = Some(idx);
    match prev {
        Some(p) => entries.get_mut(p).next = Some(idx),
        None => list.head = Some(idx),
    }
    list.count += 1;
}

pub fn unlink<T>(entries: &mut Slab<Entry<T>>, list: &mut ListHandle, idx: EntryIdx) {
    let (prev, next) = {
        let e = entries.get(idx);
        (e.prev, e.next)
    };
    match prev {
        Some(p) => entries.get_mut(p).next = next,
        None => list.head = next,
    }
    match next {
        Some(n) => entries.get_mut(n).prev = prev,
        None => list.tail = prev,
    }
    list.count -= 1;
}

/// Fields a newly inserted/appended retired entry should take on, given
/// its new predecessor in the retired list. `predecessor = None` means the entry becomes the new retired
/// head. Returns `(is_cohead, delta, needs_barrier)`.
#[must_use]
pub fn retire_link_fields<T>(
    entries: &Slab<Entry<T>>,
    predecessor: Option<EntryIdx>,
    new_kind: EntryKind,
) -> (bool, bool, bool) {
    match predecessor {
        None => (true, false, false),
        Some(p_idx) => {
            let p = entries.get(p_idx);
            if kind_conflict(p.kind, new_kind) {
                (false, true, true)
            } else {
                (p.is_cohead, false, !p.is_cohead)
            }
        }
    }
}

/// Append `idx` to the retired tail, computing and applying its
/// cohead/delta/barrier fields against the current tail.
pub fn append_to_retired<T>(state: &mut RowState<T>, idx: EntryIdx) {
    let predecessor = state.retired.tail;
    let (is_cohead, delta, needs_barrier) =
        retire_link_fields(&state.entries, predecessor, state.entries.get(idx).kind);
    {
        let e = state.entries.get_mut(idx);
        e.is_cohead = is_cohead;
        e.delta = delta;
        e.status = EntryStatus::Retired;
    }
    push_back(&mut state.entries, &mut state.retired, idx);
    if needs_barrier {
        state.entries.get(idx).txn.add_barrier();
    }
}

/// Insert `idx` into the retired list immediately before `target`,
/// computing its own cohead/delta/barrier fields. `target`'s own fields
/// are unaffected: a write entry's conflict relationship with its
/// predecessor does not change when a non-conflicting read is spliced in
/// ahead of it (see DESIGN.md).
pub fn insert_into_retired_before<T>(state: &mut RowState<T>, target: EntryIdx, idx: EntryIdx) {
    let predecessor = state.entries.get(target).prev;
    let (is_cohead, delta, needs_barrier) =
        retire_link_fields(&state.entries, predecessor, state.entries.get(idx).kind);
    {
        let e = state.entries.get_mut(idx);
        e.is_cohead = is_cohead;
        e.delta = delta;
        e.status = EntryStatus::Retired;
    }
    insert_before(&mut state.entries, &mut state.retired, target, idx);
    if needs_barrier {
        state.entries.get(idx).txn.add_barrier();
    }
}

/// Remove a retired entry whose transaction has committed, propagating
/// the barrier release: if it was the head and its successor carried a delta, clear
/// the delta and flip the following delta-free prefix to cohead,
/// releasing one barrier per flipped entry.
pub fn remove_committed_retired<T>(state: &mut RowState<T>, idx: EntryIdx) {
    let was_head = state.retired.head == Some(idx);
    let successor = state.entries.get(idx).next;
    unlink(&mut state.entries, &mut state.retired, idx);
    state.entries.remove(idx);

    if !was_head {
        return;
    }
    let Some(mut cursor) = successor else { return };
    if !state.entries.get(cursor).delta {
        return;
    }
    loop {
        let e = state.entries.get_mut(cursor);
        e.delta = false;
        e.is_cohead = true;
        e.txn.remove_barrier();
        let next = e.next;
        match next {
            Some(n) if !state.entries.get(n).delta => {
                cursor = n;
            }
            _ => break,
        }
    }
}

/// Wound the transaction owning `idx` and remove it (and cascade to every
/// retired entry after it, since a dependency edge exists from this entry
/// onward once any entry is removed out of commit order). Returns `false`
/// if the victim had already committed, in which case the wounder itself
/// must abort.
#[must_use]
pub fn wound_and_remove_retired<T>(state: &mut RowState<T>, idx: EntryIdx) -> bool {
    let txn = state.entries.get(idx).txn.clone();
    if txn.is_aborted() {
        // Already wounded by someone else; still ours to finish removing.
    } else if !txn.try_wound() {
        return false;
    }
    unlink(&mut state.entries, &mut state.retired, idx);
    state.entries.remove(idx);
    true
}

/// Roll back and remove a retired entry whose own transaction is
/// aborting — not via an external wound, but e.g. because its commit
/// spin observed the ABORTED bit set by someone else, or an application
/// chose to abort. Restores the row's pre-image if the entry was a write
/// (nothing has been applied past it yet, since a write always carries a
/// barrier for whatever follows), then cascades the same removal to
/// every entry after it, since those entries may have been satisfied by
/// reading state this write is about to undo.
#[must_use]
pub fn abort_retired_and_cascade<T: RowData>(state: &mut RowState<T>, idx: EntryIdx) -> bool {
    let was_write = state.entries.get(idx).lock_type == LockType::Exclusive;
    let pre_image = if was_write {
        state.entries.get(idx).orig_data.clone()
    } else {
        None
    };
    let successor = state.entries.get(idx).next;
    unlink(&mut state.entries, &mut state.retired, idx);
    state.entries.remove(idx);
    if let Some(pre) = pre_image {
        state.data = pre;
    }
    let mut cursor = successor;
    while let Some(c) = cursor {
        let next = state.entries.get(c).next;
        if !wound_and_remove_retired(state, c) {
            return false;
        }
        cursor = next;
    }
    true
}

pub struct RowState<T> {
    pub data: T,
    pub entries: Slab<Entry<T>>,
    pub owners: ListHandle,
    pub waiters: ListHandle,
    pub retired: ListHandle,
}

impl<T> RowState<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            entries: Slab::new(),
            owners: ListHandle::default(),
            waiters: ListHandle::default(),
            retired: ListHandle::default(),
        }
    }

    /// The retired tail is exclusive, or it is a non-cohead entry
    /// (meaning a write lies
    /// somewhere upstream of it in the same dependency chain).
    #[must_use]
    pub fn retired_has_write(&self) -> bool {
        match self.retired.tail {
            None => false,
            Some(idx) => {
                let e = self.entries.get(idx);
                e.lock_type == LockType::Exclusive || !e.is_cohead
            }
        }
    }
}

/// Outcome of a `lock_get` call: the RC, the bytes the caller should copy
/// into its `Access::data` (present for `Ok`/`Finish`), and the slab index
/// of the entry created, if any (absent on `Abort`).
pub struct LockOutcome<T> {
    pub rc: Rc,
    pub data: Option<T>,
    pub entry: Option<EntryIdx>,
}

/// What a departing owner/retired entry does to the shared row bytes on a
/// non-abort return. A plain write replaces the row outright; a commutative
/// entry applies its delta directly to the row under the same latch instead
/// of copying in a whole new image.
pub enum WriteBack<T> {
    None,
    Replace(T),
    Commutative(CommutativeOp),
}

pub(crate) fn apply_write_back<T: RowData>(state: &mut RowState<T>, wb: WriteBack<T>) {
    match wb {
        WriteBack::None => {}
        WriteBack::Replace(data) => state.data = data,
        WriteBack::Commutative(op) => state.data.apply_commutative(op),
    }
}

pub struct Row<T: RowData> {
    pub alg: CcAlg,
    pub cfg: RowLockConfig,
    inner: Mutex<RowState<T>>,
}

impl<T: RowData> Row<T> {
    #[must_use]
    pub fn new(alg: CcAlg, cfg: RowLockConfig, initial: T) -> Arc<Self> {
        Arc::new(Self {
            alg,
            cfg,
            inner: Mutex::new(RowState::new(initial)),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> T {
        self.inner.lock().data.clone()
    }

    pub fn lock_get(
        self: &Arc<Self>,
        lock_type: LockType,
        txn: &Arc<Txn>,
        alloc: &mut TsAllocator,
    ) -> LockOutcome<T> {
        let mut state = self.inner.lock();
        match self.alg {
            CcAlg::Bamboo => bamboo::lock_get(&mut state, &self.cfg, lock_type, txn, alloc),
            CcAlg::Clv => clv::lock_get(&mut state, &self.cfg, lock_type, txn, alloc),
        }
    }

    /// Release (on commit) or roll back (on abort) an owned or retired
    /// entry, updating the barrier graph and promoting waiters.
    pub fn return_row(self: &Arc<Self>, entry_idx: EntryIdx, rc: Rc, write_back: WriteBack<T>) {
        let mut state = self.inner.lock();
        match self.alg {
            CcAlg::Bamboo => bamboo::return_row(&mut state, entry_idx, rc, write_back),
            CcAlg::Clv => clv::return_row(&mut state, entry_idx, rc, write_back),
        }
    }

    /// Move an owner entry directly to retired, without releasing
    /// barriers — used by the late-retire heuristic.
    pub fn retire_row(self: &Arc<Self>, entry_idx: EntryIdx, write_back: WriteBack<T>) {
        let mut state = self.inner.lock();
        match self.alg {
            CcAlg::Bamboo => bamboo::retire_row(&mut state, entry_idx, write_back),
            CcAlg::Clv => clv::retire_row(&mut state, entry_idx, write_back),
        }
    }

    /// Block until a `Wait` entry is promoted to owner, or its transaction
    /// is wounded (possibly by a conflict on a different row entirely).
    /// Returns the data the caller should now observe, or `None` on wound.
    pub fn resolve_wait(self: &Arc<Self>, entry_idx: EntryIdx, txn: &Arc<Txn>) -> Option<T> {
        loop {
            if txn.lock_abort.load(Ordering::Acquire) {
                return None;
            }
            if txn.lock_ready.load(Ordering::Acquire) {
                let state = self.inner.lock();
                let entry = state.entries.get(entry_idx);
                return Some(match entry.lock_type {
                    LockType::Exclusive => entry
                        .orig_data
                        .clone()
                        .expect("exclusive owner entry always carries a pre-image"),
                    LockType::Shared => state.data.clone(),
                });
            }
            std::hint::spin_loop();
        }
    }

    /// Flip a live entry's conflict kind to `Commutative`; called before
    /// the entry retires so the barrier graph treats it as
    /// non-conflicting with other reads/commutative ops on the same row.
    pub fn mark_commutative(self: &Arc<Self>, entry_idx: EntryIdx) {
        let mut state = self.inner.lock();
        state.entries.get_mut(entry_idx).kind = EntryKind::Commutative;
    }
}

/// Acquire a row lock and, on a non-abort outcome, push the resulting
/// access onto `accesses`, returning the RC.
pub fn get_row<T: RowData>(
    row: Arc<Row<T>>,
    lock_type: LockType,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> (Rc, Access<T>) {
    let outcome = row.lock_get(lock_type, txn, alloc);
    let access_type = match lock_type {
        LockType::Shared => crate::access::AccessType::Read,
        LockType::Exclusive => crate::access::AccessType::Write,
    };
    let data = outcome.data.unwrap_or_else(|| row.snapshot());
    let mut access = Access::new(row, data, access_type);
    access.entry = outcome.entry;
    (outcome.rc, access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::CommutativeOp;

    #[derive(Clone)]
    pub struct IntRow(pub i64);
    impl RowData for IntRow {
        fn apply_commutative(&mut self, op: CommutativeOp) {
            match op.kind {
                crate::access::ComKind::Inc => self.0 += op.delta,
                crate::access::ComKind::Dec => self.0 -= op.delta,
            }
        }
    }

    #[test]
    fn list_push_and_unlink() {
        let mut entries: Slab<Entry<IntRow>> = Slab::new();
        let t = Txn::new(1);
        let a = entries.insert(Entry::new(t.clone(), LockType::Shared, None));
        let b = entries.insert(Entry::new(t, LockType::Shared, None));
        let mut list = ListHandle::default();
        push_back(&mut entries, &mut list, a);
        push_back(&mut entries, &mut list, b);
        assert_eq!(list.count, 2);
        assert_eq!(list.head, Some(a));
        assert_eq!(list.tail, Some(b));
        unlink(&mut entries, &mut list, a);
        assert_eq!(list.head, Some(b));
        assert_eq!(list.count, 1);
    }

    /// A younger reader RAWs off an older owner's pre-image and is
    /// inserted *before* the writer retires, so when the writer finally
    /// retires it finds the reader already ahead of it in the retired
    /// list and picks up a commit barrier instead of the reader.
    #[test]
    fn scenario_2_write_then_raw_read_leaves_writer_barrier_on_reader() {
        use crate::manager::bamboo;
        use crate::timestamp::TsSource;
        use rowcc_common::config::RowLockConfig;

        let cfg = RowLockConfig::default();
        let row = Row::<IntRow>::new(rowcc_common::config::CcAlg::Bamboo, cfg.clone(), IntRow(0));
        let src = TsSource::new();
        let mut alloc = src.allocator(false, 1);

        let t1 = Txn::new(1);
        let t2 = Txn::new(2);

        let outcome = {
            let mut state = row.inner.lock();
            bamboo::lock_get(&mut state, &cfg, LockType::Exclusive, &t1, &mut alloc)
        };
        let t1_entry = outcome.entry.unwrap();
        assert_eq!(outcome.rc, Rc::Ok);

        let outcome = {
            let mut state = row.inner.lock();
            bamboo::lock_get(&mut state, &cfg, LockType::Shared, &t2, &mut alloc)
        };
        let t2_entry = outcome.entry.unwrap();
        assert_eq!(outcome.rc, Rc::Finish, "T2 should RAW off T1's pre-image");
        assert_eq!(outcome.data.unwrap().0, 0);

        // T1 retires after T2 is already in the retired list ahead of it,
        // so T1 (not T2) picks up the barrier against its own predecessor.
        {
            let mut state = row.inner.lock();
            bamboo::retire_row(&mut state, t1_entry, WriteBack::Replace(IntRow(99)));
        }
        assert!(!t1.barriers_aborted());

        // T2 has no barrier of its own (it was the retired head) and can
        // commit immediately; doing so must release T1's barrier.
        assert!(t2.commit_spin(|| {}));
        {
            let mut state = row.inner.lock();
            bamboo::return_row(&mut state, t2_entry, Rc::Ok, WriteBack::None);
        }

        assert!(t1.commit_spin(|| {}), "T1 must unblock once T2 commits");
        assert_eq!(row.snapshot().0, 99);
    }
}
