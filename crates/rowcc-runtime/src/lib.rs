//! Worker pool, abort-backoff scheduler and demo harness. `rowcc-core`
//! knows nothing about threads, queries or workloads; this crate is the
//! thin driver that pulls queries, runs transactions against it, and
//! retries aborts with randomized backoff.

pub mod backoff;
pub mod harness;
pub mod worker;

pub use backoff::AbortBuffer;
pub use harness::{Cell, DemoTable, DemoWorkload, TestQuery};
pub use worker::{Workload, WorkerPool};
