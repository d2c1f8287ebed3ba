//! Multi-version concurrency control.
//!
//! Per-object version chains tagged by the writer's timestamp. Readers see
//! the latest version at or below their start timestamp and are never
//! blocked. Three sub-policies share the chain structure; only the
//! validation on write differs:
//!
//! - **Timestamp ordering** (MVTO): a write behind a later read dies.
//! - **Two-phase locking** (MV2PL): writers take an exclusive lock on the
//!   latest version; conflicts resolve Wait-Die style by age.
//! - **Snapshot, first-committer-wins**: writes are validated at commit
//!   against versions committed after the transaction's snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use briar_common::{DbError, DbResult, TxnId};

use crate::protocol::{AccessMode, Protocol, TxnOutcome, Verdict};

/// Write-validation sub-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvPolicy {
    /// Multi-version timestamp ordering.
    TimestampOrdering,
    /// Two-phase locking on the latest version.
    TwoPhaseLocking,
    /// Snapshot isolation with first-committer-wins.
    SnapshotFcw,
}

/// One version in a chain.
#[derive(Debug, Clone)]
struct Version {
    begin_ts: u64,
    max_read_ts: u64,
    writer: TxnId,
    committed: bool,
}

/// A per-object version chain, ordered by `begin_ts`.
#[derive(Debug)]
struct Chain {
    versions: Vec<Version>,
}

impl Chain {
    /// A chain starts with a committed genesis version visible to everyone.
    fn new() -> Self {
        Self {
            versions: vec![Version {
                begin_ts: 0,
                max_read_ts: 0,
                writer: TxnId::INVALID,
                committed: true,
            }],
        }
    }

    /// Latest version visible to a reader at `ts`: committed, or the
    /// reader's own uncommitted write.
    fn visible_mut(&mut self, ts: u64, reader: TxnId) -> &mut Version {
        let idx = self
            .versions
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| v.begin_ts <= ts && (v.committed || v.writer == reader))
            .map(|(i, _)| i)
            .unwrap_or(0);
        &mut self.versions[idx]
    }

    fn latest_committed_ts(&self) -> u64 {
        self.versions
            .iter()
            .filter(|v| v.committed)
            .map(|v| v.begin_ts)
            .max()
            .unwrap_or(0)
    }

    fn insert_sorted(&mut self, version: Version) {
        let pos = self
            .versions
            .iter()
            .position(|v| v.begin_ts > version.begin_ts)
            .unwrap_or(self.versions.len());
        self.versions.insert(pos, version);
    }
}

#[derive(Debug, Default)]
struct MvTxn {
    start_ts: u64,
    write_set: HashSet<String>,
}

/// The multi-version variant.
pub struct MultiVersion {
    policy: MvPolicy,
    clock: AtomicU64,
    chains: Mutex<HashMap<String, Chain>>,
    txns: Mutex<HashMap<TxnId, MvTxn>>,
    write_locks: Mutex<HashMap<String, TxnId>>,
}

impl MultiVersion {
    /// Creates an empty version store with the given write policy.
    pub fn new(policy: MvPolicy) -> Self {
        Self {
            policy,
            clock: AtomicU64::new(1),
            chains: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured sub-policy.
    pub fn policy(&self) -> MvPolicy {
        self.policy
    }

    fn object_key(table: &str, row_key: Option<&str>) -> String {
        match row_key {
            Some(key) => format!("{}/{}", table, key),
            None => table.to_string(),
        }
    }

    fn start_ts(&self, txn: TxnId) -> u64 {
        self.txns
            .lock()
            .get(&txn)
            .map(|t| t.start_ts)
            .unwrap_or_else(|| txn.as_u64())
    }

    /// Number of versions in an object's chain, for tests.
    pub fn chain_len(&self, table: &str, row_key: Option<&str>) -> usize {
        let key = Self::object_key(table, row_key);
        self.chains
            .lock()
            .get(&key)
            .map(|c| c.versions.len())
            .unwrap_or(0)
    }

    fn validate_write(&self, txn: TxnId, key: String) -> Verdict {
        let start_ts = self.start_ts(txn);
        match self.policy {
            MvPolicy::TimestampOrdering => {
                let mut chains = self.chains.lock();
                let chain = chains.entry(key).or_insert_with(Chain::new);
                let visible = chain.visible_mut(start_ts, txn);
                if visible.writer == txn && !visible.committed {
                    return Verdict::Grant;
                }
                if start_ts < visible.max_read_ts {
                    debug!(%txn, read_ts = visible.max_read_ts, "mvto write behind reader, die");
                    return Verdict::Die;
                }
                chain.insert_sorted(Version {
                    begin_ts: start_ts,
                    max_read_ts: start_ts,
                    writer: txn,
                    committed: false,
                });
                Verdict::Grant
            }
            MvPolicy::TwoPhaseLocking => {
                let mut locks = self.write_locks.lock();
                match locks.get(&key) {
                    Some(&holder) if holder != txn => {
                        if txn.is_older_than(holder) {
                            Verdict::Wait
                        } else {
                            debug!(%txn, %holder, "mv2pl younger writer dies");
                            Verdict::Die
                        }
                    }
                    _ => {
                        locks.insert(key.clone(), txn);
                        drop(locks);
                        let mut chains = self.chains.lock();
                        let chain = chains.entry(key).or_insert_with(Chain::new);
                        let already_written = chain
                            .versions
                            .iter()
                            .any(|v| v.writer == txn && !v.committed);
                        if !already_written {
                            chain.insert_sorted(Version {
                                begin_ts: start_ts,
                                max_read_ts: start_ts,
                                writer: txn,
                                committed: false,
                            });
                        }
                        Verdict::Grant
                    }
                }
            }
            MvPolicy::SnapshotFcw => {
                // Writes are checked at commit; just record intent.
                self.txns.lock().entry(txn).or_default().write_set.insert(key);
                Verdict::Grant
            }
        }
    }
}

impl Protocol for MultiVersion {
    fn name(&self) -> &'static str {
        match self.policy {
            MvPolicy::TimestampOrdering => "mvcc-to",
            MvPolicy::TwoPhaseLocking => "mvcc-2pl",
            MvPolicy::SnapshotFcw => "mvcc-snapshot",
        }
    }

    fn on_begin(&self, txn: TxnId) {
        let start_ts = match self.policy {
            // Snapshot ordering uses a commit serial; timestamp policies use
            // the transaction ID itself.
            MvPolicy::SnapshotFcw => self.clock.fetch_add(1, Ordering::SeqCst),
            _ => txn.as_u64(),
        };
        self.txns.lock().insert(
            txn,
            MvTxn {
                start_ts,
                write_set: HashSet::new(),
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
        match mode {
            AccessMode::Read => {
                let start_ts = self.start_ts(txn);
                let mut chains = self.chains.lock();
                let chain = chains.entry(key).or_insert_with(Chain::new);
                let visible = chain.visible_mut(start_ts, txn);
                visible.max_read_ts = visible.max_read_ts.max(start_ts);
                Verdict::Grant
            }
            AccessMode::Write => self.validate_write(txn, key),
        }
    }

    fn on_end(&self, txn: TxnId, outcome: TxnOutcome) -> DbResult<()> {
        let record = self.txns.lock().remove(&txn).unwrap_or_default();

        // MV2PL write locks release on either outcome.
        self.write_locks.lock().retain(|_, holder| *holder != txn);

        let mut chains = self.chains.lock();
        match outcome {
            TxnOutcome::Abort => {
                for chain in chains.values_mut() {
                    chain.versions.retain(|v| v.committed || v.writer != txn);
                }
                Ok(())
            }
            TxnOutcome::Commit => {
                if self.policy == MvPolicy::SnapshotFcw {
                    for key in &record.write_set {
                        let chain = chains.entry(key.clone()).or_insert_with(Chain::new);
                        if chain.latest_committed_ts() > record.start_ts {
                            debug!(%txn, key, "first committer wins, abort second");
                            // Roll the write set back before surfacing.
                            for chain in chains.values_mut() {
                                chain.versions.retain(|v| v.committed || v.writer != txn);
                            }
                            return Err(DbError::TxnAborted {
                                txn_id: txn,
                                reason: "snapshot validation failed: another \
                                         transaction committed first"
                                    .to_string(),
                            });
                        }
                    }
                    let commit_ts = self.clock.fetch_add(1, Ordering::SeqCst);
                    for key in &record.write_set {
                        let chain = chains.entry(key.clone()).or_insert_with(Chain::new);
                        chain.insert_sorted(Version {
                            begin_ts: commit_ts,
                            max_read_ts: commit_ts,
                            writer: txn,
                            committed: true,
                        });
                    }
                } else {
                    for chain in chains.values_mut() {
                        for version in &mut chain.versions {
                            if version.writer == txn {
                                version.committed = true;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: u64) -> TxnId {
        TxnId::new(id)
    }

    #[test]
    fn test_readers_never_block() {
        for policy in [
            MvPolicy::TimestampOrdering,
            MvPolicy::TwoPhaseLocking,
            MvPolicy::SnapshotFcw,
        ] {
            let mv = MultiVersion::new(policy);
            mv.on_begin(txn(1));
            mv.on_begin(txn(2));
            assert_eq!(
                mv.validate(txn(1), "t", Some("k"), AccessMode::Write),
                Verdict::Grant
            );
            assert_eq!(
                mv.validate(txn(2), "t", Some("k"), AccessMode::Read),
                Verdict::Grant
            );
        }
    }

    #[test]
    fn test_mvto_write_behind_reader_dies() {
        let mv = MultiVersion::new(MvPolicy::TimestampOrdering);
        mv.on_begin(txn(5));
        mv.on_begin(txn(3));
        // txn 5 reads the genesis version, pushing its read timestamp to 5.
        mv.validate(txn(5), "t", Some("k"), AccessMode::Read);
        // txn 3 now tries to write below that read timestamp.
        assert_eq!(
            mv.validate(txn(3), "t", Some("k"), AccessMode::Write),
            Verdict::Die
        );
    }

    #[test]
    fn test_mv2pl_wait_die_on_writes() {
        let mv = MultiVersion::new(MvPolicy::TwoPhaseLocking);
        mv.on_begin(txn(3));
        mv.on_begin(txn(4));
        assert_eq!(
            mv.validate(txn(4), "t", Some("k"), AccessMode::Write),
            Verdict::Grant
        );
        // Older writer waits for the younger holder.
        assert_eq!(
            mv.validate(txn(3), "t", Some("k"), AccessMode::Write),
            Verdict::Wait
        );
        mv.on_end(txn(4), TxnOutcome::Commit).unwrap();
        assert_eq!(
            mv.validate(txn(3), "t", Some("k"), AccessMode::Write),
            Verdict::Grant
        );
    }

    #[test]
    fn test_snapshot_first_committer_wins() {
        let mv = MultiVersion::new(MvPolicy::SnapshotFcw);
        mv.on_begin(txn(1));
        mv.on_begin(txn(2));
        mv.validate(txn(1), "t", Some("k"), AccessMode::Write);
        mv.validate(txn(2), "t", Some("k"), AccessMode::Write);
        mv.on_end(txn(1), TxnOutcome::Commit).unwrap();
        // Second committer on the same object loses.
        assert!(mv.on_end(txn(2), TxnOutcome::Commit).is_err());
    }

    #[test]
    fn test_abort_removes_uncommitted_versions() {
        let mv = MultiVersion::new(MvPolicy::TimestampOrdering);
        mv.on_begin(txn(1));
        mv.validate(txn(1), "t", Some("k"), AccessMode::Write);
        assert_eq!(mv.chain_len("t", Some("k")), 2);
        mv.on_end(txn(1), TxnOutcome::Abort).unwrap();
        assert_eq!(mv.chain_len("t", Some("k")), 1);
    }
}
