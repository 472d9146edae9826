//! BAMBOO/CLV per-row lock managers and the transaction core they serve.
//!
//! Module layout mirrors the data flow of a single access: `txn` (the
//! requester's identity and commit-barrier state), `row`/`manager` (the
//! per-row lock acquire/release algorithms), `access`/`entry` (the
//! records that tie a transaction to a row while it holds or waits on a
//! lock), and `commutative` (the deferred-delta fast path layered on top).

pub mod access;
pub mod commutative;
pub mod entry;
pub mod manager;
pub mod rc;
pub mod row;
pub mod slab;
pub mod timestamp;
pub mod transaction;
pub mod txn;

pub use access::{Access, AccessType, RowData};
pub use entry::LockType;
pub use rc::Rc;
pub use row::{get_row, Row};
pub use timestamp::{TsAllocator, TsSource};
pub use transaction::Transaction;
pub use txn::{Txn, TxnId, TxnStatus};
