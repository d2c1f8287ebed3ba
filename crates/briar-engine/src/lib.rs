//! # briar-engine
//!
//! The execution engine: the interpreter that turns physical plans into row
//! streams, and the transaction coordinator that buffers writes, collapses
//! them at commit, and rolls aborted transactions back out of storage.
//!
//! Every table access goes through the concurrency control manager; a
//! `Wait` verdict suspends the statement, a `Die` verdict surfaces as an
//! abort that the coordinator turns into the undo pipeline. Reads within a
//! transaction see buffered updates and deletes merged over the storage
//! view (read-your-writes); buffered inserts stay invisible until commit.

#![warn(missing_docs)]

pub mod buffer;
pub mod coordinator;
pub mod executor;

pub use buffer::{BufferedOp, OpKind, TxnBuffer};
pub use coordinator::{StatementResult, TransactionCoordinator};
pub use executor::{ExecOutcome, Executor};
