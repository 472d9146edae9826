//! Worker loop and thread pool: one OS thread per core, each pinned via
//! `core_affinity`, sharing a running/`sim_done` flag and joined on
//! shutdown. Each iteration pulls a ready retry or a fresh query, runs
//! it, and on abort reschedules into the abort buffer with a randomized
//! penalty.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use rowcc_common::config::{Config, WorkerConfig};
use rowcc_core::timestamp::TsAllocator;
use rowcc_core::Rc;

use crate::backoff::AbortBuffer;

/// The seam a worker thread runs against. `Query` is opaque to the
/// worker loop; it only ever moves it between `next_query`, `run_txn`
/// and the abort buffer.
pub trait Workload: Send + Sync {
    type Query;

    fn next_query(&self, thd_id: usize) -> Self::Query;

    /// Run one transaction attempt. `alloc` is this thread's own
    /// timestamp allocator (batching, if enabled, is per-thread).
    /// Returns `Ok`/`Finish` on success, `Abort`/`Error` on a retryable
    /// or application-level abort. Never returns `Wait` — a workload
    /// spins on `lock_get` internally.
    fn run_txn(&self, thd_id: usize, query: &mut Self::Query, alloc: &mut TsAllocator) -> Rc;
}

fn draw_penalty(rng: &mut impl Rng, abort_penalty_us: u64) -> Duration {
    if abort_penalty_us == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rng.gen_range(0..=abort_penalty_us))
}

fn worker_loop<W: Workload>(
    thd_id: usize,
    workload: Arc<W>,
    ts_source: rowcc_core::timestamp::TsSource,
    timestamp_batching: bool,
    timestamp_batch_num: u64,
    worker_cfg: WorkerConfig,
    max_txn_per_part: u64,
    max_runtime_secs: f64,
    sim_done: Arc<AtomicBool>,
    total_commits: Arc<AtomicU64>,
    total_aborts: Arc<AtomicU64>,
) {
    if worker_cfg.pin_affinity {
        if let Some(ids) = core_affinity::get_core_ids() {
            if !ids.is_empty() {
                core_affinity::set_for_current(ids[thd_id % ids.len()]);
            }
        }
    }

    let mut alloc = ts_source.allocator(timestamp_batching, timestamp_batch_num);
    let mut rng = rand::thread_rng();
    let mut abort_buffer = AbortBuffer::<W::Query>::new(worker_cfg.abort_buffer_size.max(1));
    let mut txn_cnt: u64 = 0;
    let run_start = Instant::now();

    while !sim_done.load(Ordering::Acquire) {
        let (mut query, _started_at) = if worker_cfg.abort_buffer_enable {
            loop {
                let now = Instant::now();
                if let Some(ready) = abort_buffer.take_ready(now) {
                    break ready;
                }
                if !abort_buffer.is_full() {
                    break (workload.next_query(thd_id), now);
                }
                if let Some(ready_at) = abort_buffer.earliest_ready_at() {
                    std::thread::sleep(ready_at.saturating_duration_since(now));
                }
            }
        } else {
            (workload.next_query(thd_id), Instant::now())
        };

        let attempt_start = Instant::now();
        let rc = workload.run_txn(thd_id, &mut query, &mut alloc);

        match rc {
            Rc::Ok | Rc::Finish => {
                txn_cnt += 1;
                total_commits.fetch_add(1, Ordering::Relaxed);
                rowcc_common::metrics::record_commit(false);
                rowcc_common::metrics::record_commit_latency_us(
                    attempt_start.elapsed().as_secs_f64() * 1_000_000.0,
                );
            }
            Rc::Abort | Rc::Error => {
                total_aborts.fetch_add(1, Ordering::Relaxed);
                rowcc_common::metrics::record_commit(true);
                let penalty = draw_penalty(&mut rng, worker_cfg.abort_penalty_us);
                if worker_cfg.abort_buffer_enable && !abort_buffer.is_full() {
                    abort_buffer.push(query, _started_at, penalty);
                } else {
                    std::thread::sleep(penalty);
                }
            }
            Rc::Wait => {
                debug!(thd_id, "workload run_txn returned Wait; treating as spurious no-op");
            }
        }

        if max_txn_per_part > 0 && txn_cnt >= max_txn_per_part {
            sim_done.store(true, Ordering::Release);
        }
        if max_runtime_secs > 0.0 && run_start.elapsed().as_secs_f64() >= max_runtime_secs {
            sim_done.store(true, Ordering::Release);
        }
    }

    debug!(thd_id, txn_cnt, "worker done");
}

/// Owns the pool of worker threads and the shared `sim_done` termination
/// flag.
pub struct WorkerPool {
    sim_done: Arc<AtomicBool>,
    total_commits: Arc<AtomicU64>,
    total_aborts: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `cfg.worker.thread_cnt` threads (0 = `num_cpus::get()`),
    /// each running `workload` in a loop until termination.
    pub fn spawn<W: Workload + 'static>(workload: Arc<W>, cfg: &Config) -> Self {
        let thread_cnt = if cfg.worker.thread_cnt == 0 {
            num_cpus::get()
        } else {
            cfg.worker.thread_cnt
        };
        info!(thread_cnt, "starting worker pool");

        let ts_source = rowcc_core::timestamp::TsSource::new();
        let sim_done = Arc::new(AtomicBool::new(false));
        let total_commits = Arc::new(AtomicU64::new(0));
        let total_aborts = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(thread_cnt);
        for thd_id in 0..thread_cnt {
            let workload = workload.clone();
            let ts_source = ts_source.clone();
            let worker_cfg = cfg.worker.clone();
            let max_txn_per_part = cfg.termination.max_txn_per_part;
            let max_runtime_secs = cfg.termination.max_runtime_secs;
            let timestamp_batching = cfg.timestamp.g_ts_batch_alloc;
            let timestamp_batch_num = cfg.timestamp.g_ts_batch_num;
            let sim_done = sim_done.clone();
            let total_commits = total_commits.clone();
            let total_aborts = total_aborts.clone();

            handles.push(std::thread::spawn(move || {
                worker_loop(
                    thd_id,
                    workload,
                    ts_source,
                    timestamp_batching,
                    timestamp_batch_num,
                    worker_cfg,
                    max_txn_per_part,
                    max_runtime_secs,
                    sim_done,
                    total_commits,
                    total_aborts,
                );
            }));
        }

        Self {
            sim_done,
            total_commits,
            total_aborts,
            handles,
        }
    }

    /// Request termination and block until every worker thread exits.
    pub fn join(mut self) -> (u64, u64) {
        self.sim_done.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        (
            self.total_commits.load(Ordering::Relaxed),
            self.total_aborts.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn commits_so_far(&self) -> u64 {
        self.total_commits.load(Ordering::Relaxed)
    }

    /// A cloneable handle to the shared termination flag, so a caller
    /// driving `join` from another thread/task can request early
    /// shutdown.
    #[must_use]
    pub fn sim_done_flag(&self) -> Arc<AtomicBool> {
        self.sim_done.clone()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sim_done.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
