//! The protocol contract shared by every concurrency control variant.

use std::fmt;

use briar_common::{DbResult, TxnId};

/// How a transaction wants to touch an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Commit: publish effects, release everything.
    Commit,
    /// Abort: discard effects, release everything.
    Abort,
}

/// The verdict of a validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the access.
    Grant,
    /// Suspend this transaction's work on the object until re-validation
    /// succeeds or the transaction is killed.
    Wait,
    /// Abort this transaction.
    Die,
}

/// One concurrency control algorithm.
///
/// The manager allocates transaction IDs and forwards lifecycle events;
/// variants keep their own per-object state. IDs are monotonic and double as
/// the start timestamp where the algorithm needs one.
pub trait Protocol: Send + Sync {
    /// A short algorithm name for logs.
    fn name(&self) -> &'static str;

    /// Called when a transaction begins.
    fn on_begin(&self, txn: TxnId);

    /// Validates an access to `(table, row_key)` and returns the verdict.
    ///
    /// Table-granular algorithms ignore `row_key`; multi-version variants
    /// key their chains on it.
    fn validate(&self, txn: TxnId, table: &str, row_key: Option<&str>, mode: AccessMode)
        -> Verdict;

    /// Called when a transaction ends.
    ///
    /// # Errors
    ///
    /// Validation-at-commit algorithms may fail a `Commit` outcome; the
    /// caller must then run its abort pipeline. The variant cleans up its
    /// own state either way.
    fn on_end(&self, txn: TxnId, outcome: TxnOutcome) -> DbResult<()>;
}
