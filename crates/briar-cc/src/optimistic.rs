//! Optimistic (validation-based) concurrency control.
//!
//! Three phases per transaction: read (accumulate read and write sets with
//! every access granted), validate (at commit, check the read set against
//! the write sets of transactions that committed concurrently), write
//! (publish on success). Aborts happen late, at commit time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use briar_common::{DbError, DbResult, TxnId};

use crate::protocol::{AccessMode, Protocol, TxnOutcome, Verdict};

#[derive(Debug, Default)]
struct TxnSets {
    start_serial: u64,
    read_set: HashSet<String>,
    write_set: HashSet<String>,
}

#[derive(Debug)]
struct CommittedTxn {
    finish_serial: u64,
    write_set: HashSet<String>,
}

/// The optimistic validation variant.
pub struct Optimistic {
    serial: AtomicU64,
    active: Mutex<HashMap<TxnId, TxnSets>>,
    committed: Mutex<Vec<CommittedTxn>>,
}

impl Optimistic {
    /// Creates an empty validator.
    pub fn new() -> Self {
        Self {
            serial: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            committed: Mutex::new(Vec::new()),
        }
    }

    fn object_key(table: &str, row_key: Option<&str>) -> String {
        match row_key {
            Some(key) => format!("{}/{}", table, key),
            None => table.to_string(),
        }
    }
}

impl Default for Optimistic {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Optimistic {
    fn name(&self) -> &'static str {
        "optimistic"
    }

    fn on_begin(&self, txn: TxnId) {
        let start_serial = self.serial.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(
            txn,
            TxnSets {
                start_serial,
                ..TxnSets::default()
            },
        );
    }

    fn validate(
        &self,
        txn: TxnId,
        table: &str,
        row_key: Option<&str>,
        mode: AccessMode,
    ) -> Verdict {
        let key = Self::object_key(table, row_key);
        let mut active = self.active.lock();
        let sets = active.entry(txn).or_default();
        match mode {
            AccessMode::Read => {
                sets.read_set.insert(key);
            }
            AccessMode::Write => {
                // A write implies reading the current state first.
                sets.read_set.insert(key.clone());
                sets.write_set.insert(key);
            }
        }
        Verdict::Grant
    }

    fn on_end(&self, txn: TxnId, outcome: TxnOutcome) -> DbResult<()> {
        let sets = self.active.lock().remove(&txn);
        let Some(sets) = sets else {
            return Ok(());
        };
        if outcome == TxnOutcome::Abort {
            return Ok(());
        }

        let mut committed = self.committed.lock();
        let conflict = committed.iter().find(|c| {
            c.finish_serial > sets.start_serial
                && !c.write_set.is_disjoint(&sets.read_set)
        });
        if let Some(conflict) = conflict {
            debug!(%txn, finish_serial = conflict.finish_serial, "validation failed");
            return Err(DbError::TxnAborted {
                txn_id: txn,
                reason: "optimistic validation failed: read set overlaps a \
                         concurrent committed write set"
                    .to_string(),
            });
        }

        let finish_serial = self.serial.fetch_add(1, Ordering::SeqCst);
        committed.push(CommittedTxn {
            finish_serial,
            write_set: sets.write_set,
        });

        // With no transactions in flight, the history cannot conflict with
        // anything anymore.
        if self.active.lock().is_empty() {
            committed.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: u64) -> TxnId {
        TxnId::new(id)
    }

    #[test]
    fn test_reads_always_grant() {
        let occ = Optimistic::new();
        occ.on_begin(txn(1));
        occ.on_begin(txn(2));
        assert_eq!(occ.validate(txn(1), "t", None, AccessMode::Write), Verdict::Grant);
        assert_eq!(occ.validate(txn(2), "t", None, AccessMode::Read), Verdict::Grant);
    }

    #[test]
    fn test_concurrent_writer_fails_reader_commit() {
        let occ = Optimistic::new();
        occ.on_begin(txn(1));
        occ.on_begin(txn(2));
        occ.validate(txn(1), "t", None, AccessMode::Write);
        occ.validate(txn(2), "t", None, AccessMode::Read);
        // Writer commits first, then the reader's validation fails.
        occ.on_end(txn(1), TxnOutcome::Commit).unwrap();
        assert!(occ.on_end(txn(2), TxnOutcome::Commit).is_err());
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let occ = Optimistic::new();
        occ.on_begin(txn(1));
        occ.on_begin(txn(2));
        occ.validate(txn(1), "a", None, AccessMode::Write);
        occ.validate(txn(2), "b", None, AccessMode::Write);
        occ.on_end(txn(1), TxnOutcome::Commit).unwrap();
        occ.on_end(txn(2), TxnOutcome::Commit).unwrap();
    }

    #[test]
    fn test_serial_transactions_commit() {
        let occ = Optimistic::new();
        occ.on_begin(txn(1));
        occ.validate(txn(1), "t", None, AccessMode::Write);
        occ.on_end(txn(1), TxnOutcome::Commit).unwrap();
        // Starts after txn 1 finished, so no overlap.
        occ.on_begin(txn(2));
        occ.validate(txn(2), "t", None, AccessMode::Write);
        occ.on_end(txn(2), TxnOutcome::Commit).unwrap();
    }

    #[test]
    fn test_abort_skips_validation() {
        let occ = Optimistic::new();
        occ.on_begin(txn(1));
        occ.on_begin(txn(2));
        occ.validate(txn(1), "t", None, AccessMode::Write);
        occ.validate(txn(2), "t", None, AccessMode::Read);
        occ.on_end(txn(1), TxnOutcome::Commit).unwrap();
        // The reader aborts; no validation error surfaces.
        occ.on_end(txn(2), TxnOutcome::Abort).unwrap();
    }
}
