//! Unified error handling for briardb.
//!
//! Every component reports failures through [`DbError`]. The [`ErrorKind`]
//! taxonomy determines the propagation policy: parse, schema, and predicate
//! errors surface to the client and leave the transaction usable; protocol,
//! resource, and internal errors drive a full abort.

use std::fmt;
use thiserror::Error;

use crate::types::TxnId;

/// Stable error categories.
///
/// The kind decides what the coordinator does with the error, independent of
/// the specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Front-end parse failure; no state change.
    Parse,
    /// Unknown table/column, bad type, PK/FK violation. Transaction stays
    /// active.
    Schema,
    /// Type mismatch in a condition, bad IN list. Transaction stays active.
    Predicate,
    /// CC-driven failure (Wait-Die die, out-of-order timestamp, validation
    /// failure). Aborts the transaction.
    Protocol,
    /// I/O failure in storage or the log. Aborts the transaction.
    Resource,
    /// Broken invariant. Aborts the transaction; the server keeps running.
    Internal,
}

impl ErrorKind {
    /// Returns true if an error of this kind aborts the whole transaction.
    #[must_use]
    pub const fn aborts_transaction(self) -> bool {
        matches!(
            self,
            ErrorKind::Protocol | ErrorKind::Resource | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Schema => "schema",
            ErrorKind::Predicate => "predicate",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Resource => "resource",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// The main error type for briardb.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQL syntax error.
    #[error("syntax error at position {position}: {message}")]
    Parse {
        /// Byte offset in the statement.
        position: usize,
        /// What went wrong.
        message: String,
    },

    /// Table already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The duplicate table.
        table: String,
    },

    /// Table not found.
    #[error("table '{table}' not found")]
    TableMissing {
        /// The missing table.
        table: String,
    },

    /// Column not found.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnMissing {
        /// The missing column.
        column: String,
        /// The table it was looked up in.
        table: String,
    },

    /// Schema definition rejected.
    #[error("invalid schema: {message}")]
    SchemaInvalid {
        /// What was invalid.
        message: String,
    },

    /// Type mismatch at write or comparison time.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: String,
        /// Actual type name.
        actual: String,
    },

    /// Foreign key constraint violated.
    #[error("foreign key violation on table '{table}': {message}")]
    FkViolation {
        /// The table carrying the constraint.
        table: String,
        /// What was violated.
        message: String,
    },

    /// Primary key constraint violated.
    #[error("primary key violation on table '{table}': duplicate value for '{column}'")]
    PkViolation {
        /// The table carrying the constraint.
        table: String,
        /// The primary key column.
        column: String,
    },

    /// Predicate could not be evaluated.
    #[error("predicate error: {message}")]
    Predicate {
        /// What went wrong.
        message: String,
    },

    /// The transaction was aborted by the concurrency protocol.
    #[error("transaction {txn_id} aborted: {reason}")]
    TxnAborted {
        /// The aborted transaction.
        txn_id: TxnId,
        /// Why the protocol killed it.
        reason: String,
    },

    /// Algorithm change rejected while transactions are active.
    #[error("cannot change algorithm: {active} transaction(s) active")]
    AlgorithmBusy {
        /// Number of active transactions.
        active: usize,
    },

    /// No transaction is in progress for this client.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A transaction is already in progress for this client.
    #[error("transaction {txn_id} already in progress")]
    TransactionInProgress {
        /// The open transaction.
        txn_id: TxnId,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: std::io::Error,
    },

    /// The log itself could not be written; the process is unrecoverable.
    #[error("log write failed: {message}")]
    LogWriteFailed {
        /// What failed.
        message: String,
    },

    /// Internal invariant broken.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl DbError {
    /// Returns the error kind for propagation decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::TableExists { .. }
            | Self::TableMissing { .. }
            | Self::ColumnMissing { .. }
            | Self::SchemaInvalid { .. }
            | Self::TypeMismatch { .. }
            | Self::FkViolation { .. }
            | Self::PkViolation { .. } => ErrorKind::Schema,
            Self::Predicate { .. } => ErrorKind::Predicate,
            Self::TxnAborted { .. }
            | Self::AlgorithmBusy { .. }
            | Self::NoTransaction
            | Self::TransactionInProgress { .. } => ErrorKind::Protocol,
            Self::Io { .. } | Self::LogWriteFailed { .. } => ErrorKind::Resource,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this error aborts the whole transaction.
    ///
    /// `NoTransaction`, `TransactionInProgress`, and `AlgorithmBusy` are
    /// client mistakes, not protocol kills; the transaction stays usable.
    #[must_use]
    pub fn aborts_transaction(&self) -> bool {
        !matches!(
            self,
            Self::NoTransaction | Self::TransactionInProgress { .. } | Self::AlgorithmBusy { .. }
        ) && self.kind().aborts_transaction()
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Creates a predicate error.
    #[must_use]
    pub fn predicate(message: impl Into<String>) -> Self {
        Self::Predicate {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Formats the client-visible message: `<kind>: <cause>`.
    ///
    /// Stack traces are never exposed.
    #[must_use]
    pub fn client_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Result type alias for briardb operations.
pub type DbResult<T> = std::result::Result<T, DbError>;
