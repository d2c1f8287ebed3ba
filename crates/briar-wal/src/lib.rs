//! # briar-wal
//!
//! The append-only write-ahead log with checkpoint markers and undo replay.
//!
//! Records are text lines in temporal order: `BEGIN,<tid>`,
//! `WRITE,<tid>,<table>,<old_json|null>,<new_json|null>`, `COMMIT,<tid>`,
//! `ABORT,<tid>`, and `CHECKPOINT`. Every write is appended to the log
//! before its mirror hits storage (the write-ahead property); everything
//! before the newest `CHECKPOINT` is considered durable in storage.
//!
//! [`RecoveryLog::recover_transaction`] walks the log backward and returns
//! the inverse of every write flushed by a checkpoint, so the coordinator
//! can roll an aborted transaction back out of storage.

#![warn(missing_docs)]

pub mod log;
pub mod record;

pub use log::{CrashRecovery, RecoveryLog};
pub use record::{StorageOp, WalRecord};
