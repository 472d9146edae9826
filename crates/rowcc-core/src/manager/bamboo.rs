//! BAMBOO acquisition and release.
//!
//! Shared requests either join the retired list directly (no timestamp
//! needed, no owner present) or read-after-write off the current
//! exclusive owner. Exclusive requests take the row outright when it is
//! completely idle, otherwise queue behind a single owner slot, wounding
//! any retired/owning entry that is newer than the requester.

use std::sync::Arc;

use rowcc_common::config::RowLockConfig;

use crate::entry::{Entry, EntryStatus, LockType};
use crate::rc::Rc;
use crate::row::{
    abort_retired_and_cascade, append_to_retired, apply_write_back, insert_before,
    insert_into_retired_before, remove_committed_retired, unlink, wound_and_remove_retired,
    LockOutcome, RowState, WriteBack,
};
use crate::slab::EntryIdx;
use crate::timestamp::TsAllocator;
use crate::txn::Txn;
use crate::access::RowData;

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

pub(crate) fn insert_waiter_ordered<T>(state: &mut RowState<T>, idx: EntryIdx) {
    let my_ts = state.entries.get(idx).txn.get_ts();
    let mut cursor = state.waiters.head;
    while let Some(c) = cursor {
        if state.entries.get(c).txn.get_ts() > my_ts {
            break;
        }
        cursor = state.entries.get(c).next;
    }
    state.entries.get_mut(idx).status = EntryStatus::Waiter;
    match cursor {
        Some(target) => insert_before(&mut state.entries, &mut state.waiters, target, idx),
        None => {
            let list = &mut state.waiters;
            let entries = &mut state.entries;
            crate::row::push_back(entries, list, idx);
        }
    }
}

/// Promote the waiters head to owner if the row is currently idle.
/// Returns the promoted entry's index, which may not be the caller's own.
fn bring_next<T: RowData>(state: &mut RowState<T>) -> Option<EntryIdx> {
    if state.owners.head.is_some() {
        return None;
    }
    let idx = state.waiters.head?;
    unlink(&mut state.entries, &mut state.waiters, idx);
    state.entries.get_mut(idx).status = EntryStatus::Owner;
    if state.entries.get(idx).lock_type == LockType::Exclusive {
        let snap = state.data.clone();
        state.entries.get_mut(idx).orig_data = Some(snap);
    }
    crate::row::push_back(&mut state.entries, &mut state.owners, idx);
    state
        .entries
        .get(idx)
        .txn
        .lock_ready
        .store(true, std::sync::atomic::Ordering::Release);
    Some(idx)
}

fn lock_get_shared<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    if !state.retired_has_write() {
        match state.owners.head {
            None => {
                let idx = state
                    .entries
                    .insert(Entry::new(txn.clone(), LockType::Shared, None));
                append_to_retired(state, idx);
                LockOutcome {
                    rc: Rc::Ok,
                    data: Some(state.data.clone()),
                    entry: Some(idx),
                }
            }
            Some(owner_idx) => {
                let owner_txn = state.entries.get(owner_idx).txn.clone();
                if txn.get_ts() == 0 {
                    txn.set_next_ts(alloc, 1);
                }
                if owner_txn.get_ts() == 0 {
                    owner_txn.set_next_ts(alloc, 1);
                }
                let my_ts = txn.get_ts();
                let owner_ts = owner_txn.get_ts();
                if !cfg.bb_opt_raw || my_ts > owner_ts {
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
                }
            }
        }
    } else {
        lock_get_shared_against_retired_write(state, cfg, txn, alloc)
    }
}

fn lock_get_shared_against_retired_write<T: RowData>(
    state: &mut RowState<T>,
    cfg: &RowLockConfig,
    txn: &Arc<Txn>,
    alloc: &mut TsAllocator,
) -> LockOutcome<T> {
    // A singleton retired EX may still be unassigned; give it a timestamp
    // before we compare against it.
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
            // T is newer than every retired write; the newest write's
            // post-image is already visible in `state.data` (applied at
            // the moment it retired — see `return_row`/`retire_row`).
            append_to_retired(state, new_idx);
            LockOutcome {
                rc: Rc::Finish,
                data: Some(state.data.clone()),
                entry: Some(new_idx),
            }
        }
    }
}

pub(crate) fn ensure_retired_reads_assigned<T>(state: &RowState<T>, alloc: &mut TsAllocator) {
    let mut cursor = state.retired.head;
    while let Some(idx) = cursor {
        let e = state.entries.get(idx);
        if e.txn.get_ts() == 0 {
            e.txn.set_next_ts(alloc, 1);
        }
        cursor = e.next;
    }
}

/// Wound `start` and every retired entry after it (a cascade: once one
/// dependency is removed out of commit order, everything downstream of it
/// is too). Returns `false` if any victim had already committed, in which
/// case the wounder itself must abort.
pub(crate) fn wound_cascade_from<T: RowData>(state: &mut RowState<T>, start: EntryIdx) -> bool {
    let mut cursor = Some(start);
    while let Some(idx) = cursor {
        let next = state.entries.get(idx).next;
        if !wound_and_remove_retired(state, idx) {
            return false;
        }
        cursor = next;
    }
    true
}

pub(crate) fn wound_owner<T: RowData>(state: &mut RowState<T>, owner_idx: EntryIdx) -> bool {
    let txn = state.entries.get(owner_idx).txn.clone();
    if !txn.is_aborted() && !txn.try_wound() {
        return false;
    }
    unlink(&mut state.entries, &mut state.owners, owner_idx);
    state.entries.remove(owner_idx);
    true
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
        crate::row::push_back(&mut state.entries, &mut state.owners, idx);
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

    let owner_idx = state.owners.head;
    if let Some(o_idx) = owner_idx {
        let o_txn = state.entries.get(o_idx).txn.clone();
        if o_txn.get_ts() == 0 {
            o_txn.set_next_ts(alloc, 1);
        }
    }
    let owner_ts = owner_idx.map(|i| state.entries.get(i).txn.get_ts());
    let owner_is_stale = owner_ts.map_or(true, |ts| ts == 0 || ts > my_ts);

    if owner_idx.is_none() || owner_is_stale {
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
        if let Some(o_idx) = state.owners.head {
            if !wound_owner(state, o_idx) {
                txn.abort_self();
                return LockOutcome {
                    rc: Rc::Abort,
                    data: None,
                    entry: None,
                };
            }
        }
    }

    let idx = state
        .entries
        .insert(Entry::new(txn.clone(), LockType::Exclusive, None));
    insert_waiter_ordered(state, idx);
    if bring_next(state) == Some(idx) {
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
            bring_next(state);
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

/// Move an owner straight to retired without releasing any barrier (the
/// late-retire heuristic: the transaction has finished its work but is
/// still waiting out its own commit spin elsewhere).
pub fn retire_row<T: RowData>(state: &mut RowState<T>, entry_idx: EntryIdx, write_back: WriteBack<T>) {
    debug_assert_eq!(state.entries.get(entry_idx).status, EntryStatus::Owner);
    unlink(&mut state.entries, &mut state.owners, entry_idx);
    apply_write_back(state, write_back);
    append_to_retired(state, entry_idx);
    bring_next(state);
}
