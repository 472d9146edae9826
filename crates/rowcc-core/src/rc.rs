//! Protocol return codes for the row-lock / transaction hot path.
//!
//! The lock manager never raises a fatal error; callers branch on one of
//! these. Fatal configuration/IO failures live in `rowcc_common::Error`
//! instead — a different tier entirely.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc {
    /// Success: the access holds the lock (as owner, or as an
    /// appended/inserted retired entry with no conflict to wait on).
    Ok,
    /// RAW fast path succeeded, or the transaction is done; a non-error
    /// sentinel distinct from `Ok`.
    Finish,
    /// The access was wounded, or declined to wait (waiter cap). The
    /// caller should roll back and retry.
    Abort,
    /// Transient: the caller must poll `Txn::lock_ready` or retry
    /// `lock_get`.
    Wait,
    /// Application-level abort (e.g. a workload-chosen early exit). Core
    /// cleanup treats this identically to `Abort`.
    Error,
}

impl Rc {
    #[must_use]
    pub fn is_abort(self) -> bool {
        matches!(self, Rc::Abort | Rc::Error)
    }
}
