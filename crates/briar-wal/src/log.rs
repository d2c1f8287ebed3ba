//! The recovery log: append, checkpoint, and undo/redo replay.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use briar_common::{DbError, DbResult, Row, TxnId};

use crate::record::{StorageOp, WalRecord};

struct LogInner {
    file: File,
    records: Vec<WalRecord>,
    writes_since_checkpoint: usize,
}

impl LogInner {
    fn append(&mut self, record: WalRecord) -> DbResult<()> {
        let line = record.encode()?;
        writeln!(self.file, "{}", line).map_err(|e| DbError::LogWriteFailed {
            message: e.to_string(),
        })?;
        self.file.flush().map_err(|e| DbError::LogWriteFailed {
            message: e.to_string(),
        })?;
        match record {
            WalRecord::Write { .. } => self.writes_since_checkpoint += 1,
            WalRecord::Checkpoint => self.writes_since_checkpoint = 0,
            _ => {}
        }
        self.records.push(record);
        Ok(())
    }
}

/// Result of a full crash-recovery sweep.
#[derive(Debug, Default)]
pub struct CrashRecovery {
    /// Forward replay of writes at or after the newest checkpoint.
    pub redo: Vec<StorageOp>,
    /// Inverse replay for loser transactions, newest write first.
    pub undo: Vec<StorageOp>,
    /// Transactions that were rolled back.
    pub losers: Vec<TxnId>,
}

/// The append-only recovery log.
///
/// A configurable number of `WRITE` records triggers a checkpoint request;
/// the coordinator flushes buffered writes to storage and then calls
/// [`RecoveryLog::checkpoint`] to append the marker.
pub struct RecoveryLog {
    path: PathBuf,
    threshold: usize,
    inner: Mutex<LogInner>,
}

impl RecoveryLog {
    /// Opens (or creates) the log file and replays existing records into
    /// memory.
    pub fn open(path: impl Into<PathBuf>, threshold: usize) -> DbResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                match WalRecord::parse(line) {
                    Ok(record) => records.push(record),
                    // A torn tail from a crash mid-append is expected; stop
                    // at the first bad line.
                    Err(e) => {
                        warn!(error = %e, "stopping WAL replay at torn record");
                        break;
                    }
                }
            }
        }
        let writes_since_checkpoint = records
            .iter()
            .rev()
            .take_while(|r| !matches!(r, WalRecord::Checkpoint))
            .filter(|r| matches!(r, WalRecord::Write { .. }))
            .count();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), records = records.len(), "recovery log opened");
        Ok(Self {
            path,
            threshold: threshold.max(1),
            inner: Mutex::new(LogInner {
                file,
                records,
                writes_since_checkpoint,
            }),
        })
    }

    /// Returns the log file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Appends `BEGIN(tid)`.
    pub fn log_begin(&self, txn: TxnId) -> DbResult<()> {
        self.inner.lock().append(WalRecord::Begin(txn))
    }

    /// Appends a `WRITE` record. Returns true when the checkpoint threshold
    /// has been crossed and the caller should flush and checkpoint.
    pub fn log_write(
        &self,
        txn: TxnId,
        table: &str,
        old: Option<Row>,
        new: Option<Row>,
    ) -> DbResult<bool> {
        let mut inner = self.inner.lock();
        inner.append(WalRecord::Write {
            txn,
            table: table.to_string(),
            old,
            new,
        })?;
        Ok(inner.writes_since_checkpoint >= self.threshold)
    }

    /// Appends `COMMIT(tid)`.
    pub fn log_commit(&self, txn: TxnId) -> DbResult<()> {
        self.inner.lock().append(WalRecord::Commit(txn))
    }

    /// Appends `ABORT(tid)`.
    pub fn log_abort(&self, txn: TxnId) -> DbResult<()> {
        self.inner.lock().append(WalRecord::Abort(txn))
    }

    /// Appends the `CHECKPOINT` marker.
    ///
    /// The coordinator flushes all buffered-not-yet-stored writes to storage
    /// before calling this, so everything before the marker is durable.
    pub fn checkpoint(&self) -> DbResult<()> {
        debug!("checkpoint marker appended");
        self.inner.lock().append(WalRecord::Checkpoint)
    }

    /// True when enough writes have accumulated since the last checkpoint.
    pub fn needs_checkpoint(&self) -> bool {
        self.inner.lock().writes_since_checkpoint >= self.threshold
    }

    /// Rolls one transaction back: walks the log backward from the tail and
    /// returns the inverse of every write of `txn` that a checkpoint flushed
    /// to storage, in walk order (most recent original write first).
    ///
    /// Writes above the newest checkpoint never reached storage; they are
    /// still in the coordinator's buffer and are skipped. Each produced
    /// inverse is appended to the log as a compensation `WRITE`, and an
    /// `ABORT(tid)` marker closes the walk.
    pub fn recover_transaction(&self, txn: TxnId) -> DbResult<Vec<StorageOp>> {
        let mut inner = self.inner.lock();
        let mut undo_ops = Vec::new();
        let mut compensations = Vec::new();
        let mut crossed_checkpoint = false;

        for record in inner.records.iter().rev() {
            if matches!(record, WalRecord::Checkpoint) {
                crossed_checkpoint = true;
                continue;
            }
            match record {
                WalRecord::Write {
                    txn: writer,
                    table,
                    old,
                    new,
                } if *writer == txn => {
                    if !crossed_checkpoint {
                        // Still buffered in the coordinator; nothing to undo
                        // in storage.
                        continue;
                    }
                    if let Some(op) = StorageOp::undo_of(table, old, new) {
                        undo_ops.push(op);
                    }
                    // Compensation record: the write with its images swapped.
                    compensations.push(WalRecord::Write {
                        txn,
                        table: table.clone(),
                        old: new.clone(),
                        new: old.clone(),
                    });
                }
                WalRecord::Begin(writer) if *writer == txn => break,
                WalRecord::Commit(writer) | WalRecord::Abort(writer) if *writer == txn => {
                    break;
                }
                _ => {}
            }
        }

        for record in compensations {
            inner.append(record)?;
        }
        inner.append(WalRecord::Abort(txn))?;
        debug!(%txn, undo = undo_ops.len(), "transaction recovery walk finished");
        Ok(undo_ops)
    }

    /// Full crash-recovery sweep: redo everything at or after the newest
    /// checkpoint, then undo every transaction that never committed or
    /// aborted, appending compensation and `ABORT` records as it goes.
    pub fn recover_crash(&self) -> DbResult<CrashRecovery> {
        let mut inner = self.inner.lock();
        let mut result = CrashRecovery::default();

        let checkpoint_pos = inner
            .records
            .iter()
            .rposition(|r| matches!(r, WalRecord::Checkpoint));
        let redo_from = checkpoint_pos.map(|p| p + 1).unwrap_or(0);

        // Redo phase: replay writes after the checkpoint forward.
        for record in &inner.records[redo_from..] {
            if let WalRecord::Write {
                table, old, new, ..
            } = record
            {
                if let Some(op) = StorageOp::redo_of(table, old, new) {
                    result.redo.push(op);
                }
            }
        }

        // Losers: began but never finished.
        let mut losers: Vec<TxnId> = Vec::new();
        for record in &inner.records {
            match record {
                WalRecord::Begin(txn) => losers.push(*txn),
                WalRecord::Commit(txn) | WalRecord::Abort(txn) => {
                    losers.retain(|t| t != txn);
                }
                _ => {}
            }
        }

        // Undo phase: walk backward over the whole log for the losers.
        let mut compensations = Vec::new();
        for record in inner.records.iter().rev() {
            if let WalRecord::Write {
                txn,
                table,
                old,
                new,
            } = record
            {
                if losers.contains(txn) {
                    if let Some(op) = StorageOp::undo_of(table, old, new) {
                        result.undo.push(op);
                    }
                    compensations.push(WalRecord::Write {
                        txn: *txn,
                        table: table.clone(),
                        old: new.clone(),
                        new: old.clone(),
                    });
                }
            }
        }
        for record in compensations {
            inner.append(record)?;
        }
        for txn in &losers {
            inner.append(WalRecord::Abort(*txn))?;
        }
        result.losers = losers;
        info!(
            redo = result.redo.len(),
            undo = result.undo.len(),
            losers = result.losers.len(),
            "crash recovery sweep finished"
        );
        Ok(result)
    }

    /// Snapshot of the in-memory record sequence, for tests and inspection.
    pub fn records(&self) -> Vec<WalRecord> {
        self.inner.lock().records.clone()
    }

    /// Counts records matching a predicate.
    pub fn count_records(&self, predicate: impl Fn(&WalRecord) -> bool) -> usize {
        self.inner.lock().records.iter().filter(|r| predicate(r)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briar_common::Value;
    use tempfile::TempDir;

    fn row(id: i64) -> Row {
        Row::from_pairs([("id".to_string(), Value::Int(id))])
    }

    fn open_log(dir: &TempDir, threshold: usize) -> RecoveryLog {
        RecoveryLog::open(dir.path().join("wal.log"), threshold).unwrap()
    }

    #[test]
    fn test_threshold_signals_checkpoint() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, 2);
        let txn = TxnId::new(1);
        log.log_begin(txn).unwrap();
        assert!(!log.log_write(txn, "t", None, Some(row(1))).unwrap());
        assert!(log.log_write(txn, "t", None, Some(row(2))).unwrap());
        log.checkpoint().unwrap();
        assert!(!log.needs_checkpoint());
    }

    #[test]
    fn test_undo_skips_unflushed_tail() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, 100);
        let txn = TxnId::new(1);
        log.log_begin(txn).unwrap();
        log.log_write(txn, "t", None, Some(row(1))).unwrap();
        log.log_write(txn, "t", None, Some(row(2))).unwrap();
        // No checkpoint: everything is still buffered, nothing to undo.
        let ops = log.recover_transaction(txn).unwrap();
        assert!(ops.is_empty());
        // The walk still closes with an ABORT marker.
        assert!(matches!(log.records().last(), Some(WalRecord::Abort(t)) if *t == txn));
    }

    #[test]
    fn test_undo_inverts_flushed_writes_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, 100);
        let txn = TxnId::new(1);
        log.log_begin(txn).unwrap();
        log.log_write(txn, "t", None, Some(row(1))).unwrap();
        log.log_write(txn, "t", Some(row(1)), Some(row(2))).unwrap();
        log.checkpoint().unwrap();
        log.log_write(txn, "t", None, Some(row(3))).unwrap();

        let ops = log.recover_transaction(txn).unwrap();
        // Only the two flushed writes are undone, newest original first.
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], StorageOp::Update { .. }));
        assert!(matches!(&ops[1], StorageOp::Delete { .. }));
    }

    #[test]
    fn test_undo_stops_at_begin() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, 100);
        let other = TxnId::new(1);
        let txn = TxnId::new(2);
        log.log_begin(other).unwrap();
        log.log_write(other, "t", None, Some(row(10))).unwrap();
        log.log_begin(txn).unwrap();
        log.log_write(txn, "t", None, Some(row(1))).unwrap();
        log.checkpoint().unwrap();

        let ops = log.recover_transaction(txn).unwrap();
        // Only txn's own write is undone, not the other transaction's.
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_replay_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let txn = TxnId::new(1);
        {
            let log = open_log(&dir, 5);
            log.log_begin(txn).unwrap();
            log.log_write(txn, "t", None, Some(row(1))).unwrap();
            log.log_commit(txn).unwrap();
        }
        let log = open_log(&dir, 5);
        let records = log.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], WalRecord::Begin(txn));
        assert!(matches!(records[2], WalRecord::Commit(t) if t == txn));
    }

    #[test]
    fn test_crash_recovery_identifies_losers() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, 100);
        let committed = TxnId::new(1);
        let loser = TxnId::new(2);
        log.log_begin(committed).unwrap();
        log.log_write(committed, "t", None, Some(row(1))).unwrap();
        log.log_commit(committed).unwrap();
        log.log_begin(loser).unwrap();
        log.log_write(loser, "t", None, Some(row(2))).unwrap();
        // Crash here: loser never commits.

        let recovery = log.recover_crash().unwrap();
        assert_eq!(recovery.losers, vec![loser]);
        assert_eq!(recovery.undo.len(), 1);
        assert!(matches!(&recovery.undo[0], StorageOp::Delete { .. }));
        // No checkpoint anywhere, so redo covers the whole log.
        assert_eq!(recovery.redo.len(), 2);
    }
}
