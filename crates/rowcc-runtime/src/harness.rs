//! Synthetic demo table and query generator for the `Test` workload kind.
//! YCSB/TPC-C are out of scope; this is the one workload
//! `Config::validate` accepts. A `DashMap`-backed fixed table stands in
//! for real row storage, and the query generator dispatches between a
//! write-then-read case and a narrow-hot-range conflict case.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

use rowcc_common::config::{Config, RowLockConfig, WorkloadConfig};
use rowcc_core::access::CommutativeOp;
use rowcc_core::timestamp::TsAllocator;
use rowcc_core::{LockType, Rc, Row, RowData, Transaction};

use crate::worker::Workload;

/// A single demo-table column value. Real row payloads are supplied by
/// whatever owns the table; this is the minimal type that lets the
/// commutative-op path exercise something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell(pub i64);

impl RowData for Cell {
    fn apply_commutative(&mut self, op: CommutativeOp) {
        match op.kind {
            rowcc_core::access::ComKind::Inc => self.0 += op.delta,
            rowcc_core::access::ComKind::Dec => self.0 -= op.delta,
        }
    }
}

/// Fixed-size table of independently lockable rows.
pub struct DemoTable {
    rows: DashMap<usize, Arc<Row<Cell>>>,
    size: usize,
}

impl DemoTable {
    #[must_use]
    pub fn new(cfg: &RowLockConfig, size: usize) -> Self {
        let rows = DashMap::with_capacity(size);
        for idx in 0..size {
            rows.insert(idx, Row::new(cfg.cc_alg, cfg.clone(), Cell(0)));
        }
        Self { rows, size }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub fn row(&self, idx: usize) -> Arc<Row<Cell>> {
        self.rows.get(&(idx % self.size)).expect("index in range").clone()
    }
}

/// The two kinds of synthetic transaction the query generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    /// Exercise the RAW fast path: write a row, then read it back.
    ReadWrite,
    /// Several accesses to the same rows, meant to produce contention
    /// and exercise wounding/retry.
    Conflict,
}

pub struct TestQuery {
    pub case: TestCase,
    pub row_indices: Vec<usize>,
}

/// `Test`-kind workload: a fixed table of counters and a query generator
/// that mixes `ReadWrite` and `Conflict` transactions over it.
pub struct DemoWorkload {
    table: DemoTable,
    workload_cfg: WorkloadConfig,
    row_lock_cfg: RowLockConfig,
    max_row_per_txn: usize,
    next_txn_id: AtomicU64,
}

impl DemoWorkload {
    #[must_use]
    pub fn new(cfg: &Config) -> Self {
        Self {
            table: DemoTable::new(&cfg.row_lock, cfg.workload.table_size.max(1)),
            workload_cfg: cfg.workload.clone(),
            row_lock_cfg: cfg.row_lock.clone(),
            max_row_per_txn: cfg.txn.max_row_per_txn,
            next_txn_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn table(&self) -> &DemoTable {
        &self.table
    }
}

impl Workload for DemoWorkload {
    type Query = TestQuery;

    fn next_query(&self, _thd_id: usize) -> TestQuery {
        let mut rng = rand::thread_rng();
        let len = self.workload_cfg.txn_len.max(1).min(self.max_row_per_txn);
        let case = if rng.gen_bool(0.5) {
            TestCase::ReadWrite
        } else {
            TestCase::Conflict
        };
        let row_indices = match case {
            // Distinct rows: no contention, just exercises the plain
            // write-then-read RAW path on each.
            TestCase::ReadWrite => (0..len).map(|i| i % self.table.len()).collect(),
            // A narrow hot range so concurrent workers collide on the
            // same handful of rows.
            TestCase::Conflict => {
                let hot_span = self.table.len().min(8).max(1);
                (0..len).map(|_| rng.gen_range(0..hot_span)).collect()
            }
        };
        TestQuery { case, row_indices }
    }

    fn run_txn(&self, _thd_id: usize, query: &mut TestQuery, alloc: &mut TsAllocator) -> Rc {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let mut txn = Transaction::<Cell>::new(txn_id, self.max_row_per_txn);

        for &idx in &query.row_indices {
            let row = self.table.row(idx);
            let lock_type = match query.case {
                TestCase::ReadWrite => LockType::Exclusive,
                TestCase::Conflict => {
                    if idx % 3 == 0 {
                        LockType::Exclusive
                    } else {
                        LockType::Shared
                    }
                }
            };
            let Some(access) = txn.get_row(row, lock_type, alloc) else {
                txn.finish(Rc::Abort, &self.row_lock_cfg);
                return Rc::Abort;
            };
            if lock_type == LockType::Exclusive {
                access.data.0 += 1;
            }
        }

        if txn.finish(Rc::Ok, &self.row_lock_cfg) {
            Rc::Ok
        } else {
            Rc::Abort
        }
    }
}
