//! Integration tests exercising `rowcc-core`'s public API and the
//! `rowcc-runtime` worker pool together, covering the concrete
//! lock-ordering scenarios at the black-box `Row`/`Transaction` level
//! (internal retired-list bookkeeping has its own unit tests in
//! `rowcc-core`).

use std::sync::Arc;
use std::time::Duration;

use rowcc_common::config::{CcAlg, Config, RowLockConfig};
use rowcc_core::access::CommutativeOp;
use rowcc_core::{LockType, Rc, Row, RowData, Transaction, Txn, TsSource};
use rowcc_runtime::{DemoWorkload, WorkerPool};

#[derive(Clone, Debug, PartialEq)]
struct Counter(i64);

impl RowData for Counter {
    fn apply_commutative(&mut self, op: CommutativeOp) {
        match op.kind {
            rowcc_core::access::ComKind::Inc => self.0 += op.delta,
            rowcc_core::access::ComKind::Dec => self.0 -= op.delta,
        }
    }
}

fn row_lock_cfg(alg: CcAlg) -> RowLockConfig {
    RowLockConfig {
        cc_alg: alg,
        ..RowLockConfig::default()
    }
}

#[rstest::rstest]
#[case(CcAlg::Bamboo)]
#[case(CcAlg::Clv)]
fn scenario_1_pure_reads_commit_with_no_conflict(#[case] alg: CcAlg) {
    let cfg = row_lock_cfg(alg);
    let row = Row::new(alg, cfg.clone(), Counter(1));
    let src = TsSource::new();
    let mut alloc = src.allocator(false, 1);

    let mut t1 = Transaction::<Counter>::new(1, 8);
    let mut t2 = Transaction::<Counter>::new(2, 8);

    assert!(t1.get_row(row.clone(), LockType::Shared, &mut alloc).is_some());
    assert!(t2.get_row(row.clone(), LockType::Shared, &mut alloc).is_some());

    assert!(t1.finish(Rc::Ok, &cfg));
    assert!(t2.finish(Rc::Ok, &cfg));
    assert_eq!(row.snapshot(), Counter(1));
}

#[rstest::rstest]
#[case(CcAlg::Bamboo)]
#[case(CcAlg::Clv)]
fn scenario_2_younger_reader_raws_off_older_writer(#[case] alg: CcAlg) {
    let cfg = row_lock_cfg(alg);
    let row = Row::new(alg, cfg.clone(), Counter(0));
    let src = TsSource::new();
    let mut alloc = src.allocator(false, 1);

    let mut writer = Transaction::<Counter>::new(1, 8);
    {
        let access = writer
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Counter(99);
    }

    // A concurrent reader arriving while the writer still owns the row
    // short-circuits via RAW, observing the pre-image without waiting.
    let mut reader = Transaction::<Counter>::new(2, 8);
    let read = reader
        .get_row(row.clone(), LockType::Shared, &mut alloc)
        .unwrap();
    assert_eq!(read.data, Counter(0));

    assert!(reader.finish(Rc::Ok, &cfg));
    assert!(writer.finish(Rc::Ok, &cfg));
    assert_eq!(row.snapshot(), Counter(99));
}

#[rstest::rstest]
#[case(CcAlg::Bamboo)]
#[case(CcAlg::Clv)]
fn scenario_3_older_exclusive_wounds_younger_owner(#[case] alg: CcAlg) {
    let cfg = row_lock_cfg(alg);
    let row = Row::new(alg, cfg.clone(), Counter(0));
    let src = TsSource::new();
    let mut alloc = src.allocator(false, 1);

    let mut t1 = Transaction::<Counter>::new(1, 8);
    {
        let access = t1
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .unwrap();
        access.data = Counter(5);
    }

    let mut t2 = Transaction::<Counter>::new(2, 8);
    {
        // T1 never assigned a timestamp (still owner, not yet retired),
        // so it reads as stale to the exclusive-acquisition wound check
        // and is wounded unconditionally.
        let access = t2
            .get_row(row.clone(), LockType::Exclusive, &mut alloc)
            .expect("T2 should wound T1 and take ownership");
        access.data = Counter(7);
    }

    assert!(t1.txn.is_aborted());
    assert!(!t1.finish(Rc::Ok, &cfg));
    assert_eq!(row.snapshot(), Counter(0), "T1's write must roll back");

    assert!(t2.finish(Rc::Ok, &cfg));
    assert_eq!(row.snapshot(), Counter(7));
}

#[test]
fn scenario_4_waiter_cap_aborts_immediately() {
    let cfg = RowLockConfig {
        cc_alg: CcAlg::Bamboo,
        bb_opt_max_waiter: 1,
        ..RowLockConfig::default()
    };
    let row = Row::new(CcAlg::Bamboo, cfg.clone(), Counter(0));
    let src = TsSource::new();
    let mut alloc = src.allocator(false, 1);

    // Queuing T2 behind T1 (rather than driving it through
    // `Transaction::get_row`, which now blocks until a `Wait` entry is
    // actually promoted) lets this single-threaded test observe the
    // queued state directly instead of deadlocking on it.
    let owner = Txn::new(1);
    let outcome = row.lock_get(LockType::Exclusive, &owner, &mut alloc);
    assert_eq!(outcome.rc, Rc::Ok);

    // Give the owner a timestamp so it no longer looks stale to a
    // contending exclusive request, forcing the requester to queue
    // instead of wounding.
    owner.set_next_ts(&mut alloc, 1);

    let waiter = Txn::new(2);
    let waiter_outcome = row.lock_get(LockType::Exclusive, &waiter, &mut alloc);
    assert_eq!(waiter_outcome.rc, Rc::Wait, "T2 should queue behind the owner");

    let over_cap = Txn::new(3);
    let over_cap_outcome = row.lock_get(LockType::Exclusive, &over_cap, &mut alloc);
    assert_eq!(
        over_cap_outcome.rc,
        Rc::Abort,
        "the waiter cap should abort T3 immediately"
    );
    assert!(over_cap.is_aborted());
}

#[tokio::test]
async fn worker_pool_runs_to_completion_under_the_demo_workload() {
    let mut config = Config::default();
    config.worker.thread_cnt = 2;
    config.termination.max_txn_per_part = 200;
    config.termination.max_runtime_secs = 0.0;
    config.workload.table_size = 16;
    config.workload.txn_len = 3;

    let workload = Arc::new(DemoWorkload::new(&config));
    let pool = WorkerPool::spawn(workload, &config);

    let (commits, _aborts) = tokio::task::spawn_blocking(move || pool.join())
        .await
        .expect("worker pool thread panicked");

    // Each of the 2 threads commits at least max_txn_per_part before
    // sim_done propagates, so the total is at least that many.
    assert!(commits >= config.termination.max_txn_per_part);
}

#[tokio::test]
async fn worker_pool_stops_promptly_on_external_signal() {
    let mut config = Config::default();
    config.worker.thread_cnt = 1;
    config.termination.max_txn_per_part = 0;
    config.termination.max_runtime_secs = 0.0;
    config.workload.table_size = 8;

    let workload = Arc::new(DemoWorkload::new(&config));
    let pool = WorkerPool::spawn(workload, &config);
    let sim_done = pool.sim_done_flag();

    tokio::time::sleep(Duration::from_millis(20)).await;
    sim_done.store(true, std::sync::atomic::Ordering::Release);

    let (_commits, _aborts) = tokio::task::spawn_blocking(move || pool.join())
        .await
        .expect("worker pool thread panicked");
}
