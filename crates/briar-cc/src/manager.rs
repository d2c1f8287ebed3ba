//! The concurrency control manager.
//!
//! Allocates monotonic transaction IDs, tracks which transactions are
//! active, forwards validation to the configured protocol variant, turns a
//! `Wait` verdict into a blocking acquisition, and swaps algorithms only at
//! quiescence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use briar_common::{ClientId, DbError, DbResult, TxnId};

use crate::mvcc::{MultiVersion, MvPolicy};
use crate::optimistic::Optimistic;
use crate::protocol::{AccessMode, Protocol, TxnOutcome, Verdict};
use crate::timestamp::TimestampOrdering;
use crate::wait_die::WaitDie;

/// The selectable algorithm variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    /// Wait-Die lock manager (primary variant).
    WaitDie,
    /// Timestamp ordering.
    TimestampOrdering,
    /// Optimistic validation.
    Optimistic,
    /// Multi-version with a write sub-policy.
    MultiVersion(MvPolicy),
}

impl AlgorithmKind {
    /// Parses an algorithm name as it appears in configuration or a client
    /// command.
    #[must_use]
    pub fn parse(name: &str) -> Option<AlgorithmKind> {
        match name.to_ascii_lowercase().as_str() {
            "wait-die" | "waitdie" | "lock" => Some(AlgorithmKind::WaitDie),
            "tso" | "timestamp" => Some(AlgorithmKind::TimestampOrdering),
            "occ" | "optimistic" | "validation" => Some(AlgorithmKind::Optimistic),
            "mvcc" | "mvcc-to" => {
                Some(AlgorithmKind::MultiVersion(MvPolicy::TimestampOrdering))
            }
            "mvcc-2pl" => Some(AlgorithmKind::MultiVersion(MvPolicy::TwoPhaseLocking)),
            "mvcc-snapshot" | "snapshot" => {
                Some(AlgorithmKind::MultiVersion(MvPolicy::SnapshotFcw))
            }
            _ => None,
        }
    }

    fn build(self) -> Arc<dyn Protocol> {
        match self {
            AlgorithmKind::WaitDie => Arc::new(WaitDie::new()),
            AlgorithmKind::TimestampOrdering => Arc::new(TimestampOrdering::new()),
            AlgorithmKind::Optimistic => Arc::new(Optimistic::new()),
            AlgorithmKind::MultiVersion(policy) => Arc::new(MultiVersion::new(policy)),
        }
    }
}

struct Registry {
    kind: AlgorithmKind,
    protocol: Arc<dyn Protocol>,
    active: HashMap<TxnId, ClientId>,
}

/// The concurrency control manager.
pub struct CcManager {
    next_txn: AtomicU64,
    registry: Mutex<Registry>,
    /// Wake channel for blocked acquisitions: bumped on every transaction
    /// end so waiters re-validate.
    wake_gen: Mutex<u64>,
    wake: Condvar,
}

impl CcManager {
    /// Creates a manager running the given algorithm.
    pub fn new(kind: AlgorithmKind) -> Self {
        Self {
            next_txn: AtomicU64::new(TxnId::MIN.as_u64()),
            registry: Mutex::new(Registry {
                kind,
                protocol: kind.build(),
                active: HashMap::new(),
            }),
            wake_gen: Mutex::new(0),
            wake: Condvar::new(),
        }
    }

    /// Begins a transaction for a client and returns its ID.
    pub fn begin(&self, client: ClientId) -> TxnId {
        let txn = TxnId::new(self.next_txn.fetch_add(1, Ordering::SeqCst));
        let mut registry = self.registry.lock();
        registry.active.insert(txn, client);
        registry.protocol.on_begin(txn);
        debug!(%txn, %client, algorithm = registry.protocol.name(), "transaction begun");
        txn
    }

    /// Validates one access; the verdict drives executor behavior.
    pub fn validate(
        &self,
        txn: TxnId,
        table: &str,
        row_key: Option<&str>,
        mode: AccessMode,
    ) -> Verdict {
        let protocol = self.registry.lock().protocol.clone();
        protocol.validate(txn, table, row_key, mode)
    }

    /// Blocking acquisition: re-validates on `Wait` until granted or killed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TxnAborted`] on a `Die` verdict; the caller must
    /// run its abort pipeline.
    pub fn acquire(
        &self,
        txn: TxnId,
        table: &str,
        row_key: Option<&str>,
        mode: AccessMode,
    ) -> DbResult<()> {
        loop {
            match self.validate(txn, table, row_key, mode) {
                Verdict::Grant => return Ok(()),
                Verdict::Die => {
                    return Err(DbError::TxnAborted {
                        txn_id: txn,
                        reason: format!(
                            "{} access to '{}' denied by concurrency protocol",
                            mode, table
                        ),
                    });
                }
                Verdict::Wait => {
                    // Park until some transaction ends, with a bounded
                    // re-check interval guarding against missed wakeups.
                    let mut gen = self.wake_gen.lock();
                    let seen = *gen;
                    while *gen == seen {
                        let timed_out = self
                            .wake
                            .wait_for(&mut gen, Duration::from_millis(10))
                            .timed_out();
                        if timed_out {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Ends a transaction, releasing everything it holds.
    ///
    /// # Errors
    ///
    /// Validation-at-commit algorithms may refuse a `Commit`; the
    /// transaction is deregistered either way and the caller runs its abort
    /// pipeline.
    pub fn end(&self, txn: TxnId, outcome: TxnOutcome) -> DbResult<()> {
        let result = {
            let mut registry = self.registry.lock();
            registry.active.remove(&txn);
            registry.protocol.on_end(txn, outcome)
        };
        *self.wake_gen.lock() += 1;
        self.wake.notify_all();
        debug!(%txn, ?outcome, "transaction ended");
        result
    }

    /// Swaps the algorithm. Fails with `Busy` while transactions are active.
    pub fn change_algorithm(&self, kind: AlgorithmKind) -> DbResult<()> {
        let mut registry = self.registry.lock();
        if !registry.active.is_empty() {
            return Err(DbError::AlgorithmBusy {
                active: registry.active.len(),
            });
        }
        if registry.kind != kind {
            registry.kind = kind;
            registry.protocol = kind.build();
            info!(algorithm = registry.protocol.name(), "algorithm changed");
        }
        Ok(())
    }

    /// Returns the current algorithm.
    pub fn algorithm(&self) -> AlgorithmKind {
        self.registry.lock().kind
    }

    /// Number of active transactions.
    pub fn active_count(&self) -> usize {
        self.registry.lock().active.len()
    }

    /// Returns true if `txn` is still active.
    pub fn is_active(&self, txn: TxnId) -> bool {
        self.registry.lock().active.contains_key(&txn)
    }
}

impl Default for CcManager {
    fn default() -> Self {
        Self::new(AlgorithmKind::WaitDie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_monotonic_ids() {
        let cc = CcManager::default();
        let a = cc.begin(ClientId::new(1));
        let b = cc.begin(ClientId::new(2));
        assert!(a.is_older_than(b));
    }

    #[test]
    fn test_change_algorithm_busy() {
        let cc = CcManager::default();
        let txn = cc.begin(ClientId::new(1));
        assert!(matches!(
            cc.change_algorithm(AlgorithmKind::TimestampOrdering),
            Err(DbError::AlgorithmBusy { active: 1 })
        ));
        cc.end(txn, TxnOutcome::Abort).unwrap();
        cc.change_algorithm(AlgorithmKind::TimestampOrdering).unwrap();
        assert_eq!(cc.algorithm(), AlgorithmKind::TimestampOrdering);
    }

    #[test]
    fn test_die_maps_to_abort_error() {
        let cc = CcManager::default();
        let older = cc.begin(ClientId::new(1));
        let younger = cc.begin(ClientId::new(2));
        cc.acquire(older, "accounts", None, AccessMode::Write).unwrap();
        let err = cc
            .acquire(younger, "accounts", None, AccessMode::Write)
            .unwrap_err();
        assert!(matches!(err, DbError::TxnAborted { .. }));
    }

    #[test]
    fn test_older_blocks_until_younger_ends() {
        let cc = Arc::new(CcManager::default());
        let older = cc.begin(ClientId::new(1));
        let younger = cc.begin(ClientId::new(2));
        cc.acquire(younger, "accounts", None, AccessMode::Write).unwrap();

        let cc2 = Arc::clone(&cc);
        let waiter = thread::spawn(move || {
            cc2.acquire(older, "accounts", None, AccessMode::Write)
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        cc.end(younger, TxnOutcome::Commit).unwrap();
        waiter.join().unwrap().unwrap();
        cc.end(older, TxnOutcome::Commit).unwrap();
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(AlgorithmKind::parse("wait-die"), Some(AlgorithmKind::WaitDie));
        assert_eq!(
            AlgorithmKind::parse("MVCC-2PL"),
            Some(AlgorithmKind::MultiVersion(MvPolicy::TwoPhaseLocking))
        );
        assert_eq!(AlgorithmKind::parse("nonsense"), None);
    }
}
