//! CLV acquisition and release.
//!
//! Differs from BAMBOO in one structural respect: the owners list can
//! hold more than one entry (a batch of compatible shared readers, or a
//! lone exclusive writer), rather than BAMBOO's single exclusive-only
//! owner slot. Everything else — the retired list, the barrier graph, the
//! wound cascade — is identical and lives in `row.rs`.
//!
//! The original C++ `wound_conflict` walk over the owners list advanced
//! its cursor only inside the branch that found a conflicting entry,
//! spinning forever on the first non-conflicting owner it met (Open
//! Question (b) in DESIGN.md). `wound_owners_list` below captures `next`
//! unconditionally before any mutation, every iteration.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rowcc_common::config::RowLockConfig;

use crate::access::RowData;
use crate::entry::{Entry, EntryStatus, LockType};
use crate::manager::bamboo::{
    ensure_retired_reads_assigned, insert_waiter_ordered, wound_cascade_from, wound_owner,
};
use crate::rc::Rc;
use crate::row::{
    abort_retired_and_cascade, append_to_retired, apply_write_back, insert_into_retired_before,
    push_back, remove_committed_retired, unlink, LockOutcome, RowState, WriteBack,
};
use crate::slab::EntryIdx;
use crate::timestamp::TsAllocator;
use crate::txn::Txn;

pub fn lock_get<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    lock_type: LockType,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    match lock_type {
        LockType::Shared => lock_get_shared(state, cfg, txn, alloc),
        LockType::Exclusive => lock_get_exclusive(state, cfg, txn, alloc),
    }
}

fn owners_compatible_with_shared<T>(state: &RowState<T>) -> bool {
    match state.owners.head {
        None => true,
        Some(o) => state.entries.get(o).lock_type == LockType::Shared,
    }
}

fn lock_get_shared<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    if !state.retired_has_write() && owners_compatible_with_shared(state) {
        let idx = state
            .entries
            .insert(Entry::new(txn.clone(), LockType::Shared, None));
        state.entries.get_mut(idx).status = EntryStatus::Owner;
        push_back(&mut state.entries, &mut state.owners, idx);
        return LockOutcome {
            rc: Rc::Ok,
            data: Some(state.data.clone()),
            entry: Some(idx),
        };
    }

    if !state.retired_has_write() {
        // Exactly one exclusive owner is present (shared case handled above).
        let owner_idx = state.owners.head.expect("incompatible implies an owner");
        let owner_txn = state.entries.get(owner_idx).txn.clone();
        if txn.get_ts() == 0 {
            txn.set_next_ts(alloc, 1);
        }
        if owner_txn.get_ts() == 0 {
            owner_txn.set_next_ts(alloc, 1);
        }
        let my_ts = txn.get_ts();
        let owner_ts = owner_txn.get_ts();
        return if !cfg.bb_opt_raw || my_ts > owner_ts {
            let idx = state
                .entries
                .insert(Entry::new(txn.clone(), LockType::Shared, None));
            insert_waiter_ordered(state, idx);
            LockOutcome {
                rc: Rc::Wait,
                data: None,
                entry: Some(idx),
            }
        } else {
            let pre_image = state
                .entries
                .get(owner_idx)
                .orig_data
                .clone()
                .expect("exclusive owner entry always carries a pre-image");
            let idx = state
                .entries
                .insert(Entry::new(txn.clone(), LockType::Shared, None));
            append_to_retired(state, idx);
            LockOutcome {
                rc: Rc::Finish,
                data: Some(pre_image),
                entry: Some(idx),
            }
        };
    }

    lock_get_shared_against_retired_write(state, cfg, txn, alloc)
}

fn lock_get_shared_against_retired_write<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    if state.retired.count == 1 {
        if let Some(only) = state.retired.head {
            let e = state.entries.get(only);
            if e.lock_type == LockType::Exclusive && e.txn.get_ts() == 0 {
                let t = e.txn.clone();
                t.set_next_ts(alloc, 1);
            }
        }
    }
    if txn.get_ts() == 0 {
        txn.set_next_ts(alloc, 1);
    }
    let my_ts = txn.get_ts();

    let owner_idx = state.owners.head;
    let owner_ts = owner_idx.map(|i| state.entries.get(i).txn.get_ts());
    let should_insert = cfg.bb_opt_raw && (owner_idx.is_none() || owner_ts.unwrap() > my_ts);

    if !should_insert {
        let idx = state
            .entries
            .insert(Entry::new(txn.clone(), LockType::Shared, None));
        insert_waiter_ordered(state, idx);
        return LockOutcome {
            rc: Rc::Wait,
            data: None,
            entry: Some(idx),
        };
    }

    let mut cursor = state.retired.head;
    let mut target = None;
    while let Some(idx) = cursor {
        let e = state.entries.get(idx);
        if e.lock_type == LockType::Exclusive && e.txn.get_ts() > my_ts {
            target = Some(idx);
            break;
        }
        cursor = e.next;
    }

    let new_idx = state
        .entries
        .insert(Entry::new(txn.clone(), LockType::Shared, None));
    match target {
        Some(target_idx) => {
            let pre_image = state
                .entries
                .get(target_idx)
                .orig_data
                .clone()
                .expect("exclusive retired entry always carries a pre-image");
            insert_into_retired_before(state, target_idx, new_idx);
            LockOutcome {
                rc: Rc::Finish,
                data: Some(pre_image),
                entry: Some(new_idx),
            }
        }
        None => {
            append_to_retired(state, new_idx);
            LockOutcome {
                rc: Rc::Finish,
                data: Some(state.data.clone()),
                entry: Some(new_idx),
            }
        }
    }
}

/// Wound every stale owner. Unlike BAMBOO's singleton owner slot, CLV's
/// owners list may hold several compatible shared readers; `next` is
/// captured before any mutation so the walk always advances.
fn wound_owners_list<T: RowData>(state: &mut RowState<T>, my_ts: u64) -> bool {
    let mut cursor = state.owners.head;
    while let Some(idx) = cursor {
        let next = state.entries.get(idx).next;
        let ts = state.entries.get(idx).txn.get_ts();
        if ts == 0 || ts > my_ts {
            if !wound_owner(state, idx) {
                return false;
            }
        }
        cursor = next;
    }
    true
}

fn promote_waiters<T: RowData>(state: &mut RowState<T>) {
    loop {
        let Some(idx) = state.waiters.head else {
            return;
        };
        let compatible = match state.owners.head {
            None => true,
            Some(o) => {
                state.entries.get(o).lock_type == LockType::Shared
                    && state.entries.get(idx).lock_type == LockType::Shared
            }
        };
        if !compatible {
            return;
        }
        unlink(&mut state.entries, &mut state.waiters, idx);
        state.entries.get_mut(idx).status = EntryStatus::Owner;
        if state.entries.get(idx).lock_type == LockType::Exclusive {
            let snap = state.data.clone();
            state.entries.get_mut(idx).orig_data = Some(snap);
        }
        push_back(&mut state.entries, &mut state.owners, idx);
        state.entries.get(idx).txn.lock_ready.store(true, Ordering::Release);
        if state.entries.get(idx).lock_type == LockType::Exclusive {
            return;
        }
    }
}

fn lock_get_exclusive<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    if state.retired.count == 0 && state.owners.head.is_none() {
        let idx = state.entries.insert(Entry::new(
            txn.clone(),
            LockType::Exclusive,
            Some(state.data.clone()),
        ));
        state.entries.get_mut(idx).status = EntryStatus::Owner;
        push_back(&mut state.entries, &mut state.owners, idx);
        return LockOutcome {
            rc: Rc::Ok,
            data: Some(state.data.clone()),
            entry: Some(idx),
        };
    }

    if cfg.bb_opt_max_waiter > 0 && state.waiters.count >= cfg.bb_opt_max_waiter {
        return LockOutcome {
            rc: Rc::Abort,
            data: None,
            entry: None,
        };
    }

    let was_write_free = !state.retired_has_write();
    if was_write_free {
        ensure_retired_reads_assigned(state, alloc);
    }
    if txn.get_ts() == 0 {
        txn.set_next_ts(alloc, 1);
    }
    let my_ts = txn.get_ts();

    let mut cursor = state.owners.head;
    while let Some(idx) = cursor {
        let next = state.entries.get(idx).next;
        let o_txn = state.entries.get(idx).txn.clone();
        if o_txn.get_ts() == 0 {
            o_txn.set_next_ts(alloc, 1);
        }
        cursor = next;
    }

    let mut cursor = state.retired.head;
    while let Some(idx) = cursor {
        let next = state.entries.get(idx).next;
        let e_ts = state.entries.get(idx).txn.get_ts();
        if e_ts == 0 || e_ts > my_ts {
            if !wound_cascade_from(state, idx) {
                txn.abort_self();
                return LockOutcome {
                    rc: Rc::Abort,
                    data: None,
                    entry: None,
                };
            }
            break;
        }
        cursor = next;
    }

    if !wound_owners_list(state, my_ts) {
        txn.abort_self();
        return LockOutcome {
            rc: Rc::Abort,
            data: None,
            entry: None,
        };
    }

    let idx = state
        .entries
        .insert(Entry::new(txn.clone(), LockType::Exclusive, None));
    insert_waiter_ordered(state, idx);
    promote_waiters(state);
    if state.entries.get(idx).status == EntryStatus::Owner {
        let data = state
            .entries
            .get(idx)
            .orig_data
            .clone()
            .expect("exclusive owner entry always carries a pre-image");
        LockOutcome {
            rc: Rc::Ok,
            data: Some(data),
            entry: Some(idx),
        }
    } else {
        LockOutcome {
            rc: Rc::Wait,
            data: None,
            entry: Some(idx),
        }
    }
}

pub fn return_row<T: RowData>(
    state: &mut RowState<T>,
    entry_idx: EntryIdx,
    rc: Rc,
    write_back: WriteBack<T>,
) {
    let status = state.entries.get(entry_idx).status;
    match status {
        EntryStatus::Owner => {
            unlink(&mut state.entries, &mut state.owners, entry_idx);
            if !rc.is_abort() {
                apply_write_back(state, write_back);
            }
            state.entries.remove(entry_idx);
            promote_waiters(state);
        }
        EntryStatus::Retired => {
            if rc.is_abort() {
                let _ = abort_retired_and_cascade(state, entry_idx);
            } else {
                apply_write_back(state, write_back);
                remove_committed_retired(state, entry_idx);
            }
        }
        EntryStatus::Waiter => {
            unlink(&mut state.entries, &mut state.waiters, entry_idx);
            state.entries.remove(entry_idx);
        }
    }
}

pub fn retire_row<T: RowData>(state: &mut RowState<T>, entry_idx: EntryIdx, write_back: WriteBack<T>) {
    debug_assert_eq!(state.entries.get(entry_idx).status, EntryStatus::Owner);
    unlink(&mut state.entries, &mut state.owners, entry_idx);
    apply_write_back(state, write_back);
    append_to_retired(state, entry_idx);
    promote_waiters(state);
}
