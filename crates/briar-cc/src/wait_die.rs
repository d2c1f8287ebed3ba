//! The Wait-Die lock manager, the primary concurrency control variant.
//!
//! Locks are table-granular. Shared locks coexist; exclusive locks are held
//! alone; an upgrade from shared to exclusive is allowed only for the sole
//! shared holder. On conflict the requester's age decides: older than the
//! oldest holder waits in a FIFO queue, younger dies.
//!
//! Deadlock freedom follows from one-way waits: every edge in the waits-for
//! graph points from an older transaction to a younger one. Row granularity
//! is a future refinement.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use briar_common::{DbResult, TxnId};

use crate::protocol::{AccessMode, Protocol, TxnOutcome, Verdict};

/// Lock mode held on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared (read) lock.
    Shared,
    /// Exclusive (write) lock.
    Exclusive,
}

impl LockMode {
    /// Shared is compatible with shared; everything else conflicts.
    #[must_use]
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

impl From<AccessMode> for LockMode {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => LockMode::Shared,
            AccessMode::Write => LockMode::Exclusive,
        }
    }
}

/// Lock state of one table.
#[derive(Debug)]
struct LockState {
    mode: LockMode,
    holders: BTreeSet<TxnId>,
    wait_queue: VecDeque<(TxnId, LockMode)>,
}

impl LockState {
    fn new() -> Self {
        Self {
            mode: LockMode::Shared,
            holders: BTreeSet::new(),
            wait_queue: VecDeque::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.holders.is_empty() && self.wait_queue.is_empty()
    }

    fn oldest_other_holder(&self, txn: TxnId) -> Option<TxnId> {
        self.holders.iter().copied().find(|h| *h != txn)
    }

    fn is_queued(&self, txn: TxnId) -> bool {
        self.wait_queue.iter().any(|(t, _)| *t == txn)
    }

    fn grant(&mut self, txn: TxnId, mode: LockMode) {
        if self.holders.is_empty() {
            self.mode = mode;
        } else if mode == LockMode::Exclusive {
            self.mode = LockMode::Exclusive;
        }
        self.holders.insert(txn);
        self.wait_queue.retain(|(t, _)| *t != txn);
    }

    /// Wakes waiters in FIFO order, granting as long as compatibility allows.
    fn promote_waiters(&mut self) {
        while let Some(&(txn, mode)) = self.wait_queue.front() {
            let can_grant = self.holders.is_empty()
                || mode.is_compatible_with(self.mode)
                || (self.holders.len() == 1 && self.holders.contains(&txn));
            if !can_grant {
                break;
            }
            self.wait_queue.pop_front();
            self.grant(txn, mode);
            if mode == LockMode::Exclusive {
                break;
            }
        }
    }
}

/// Counters exposed for observability and tests.
#[derive(Debug, Default)]
pub struct WaitDieStats {
    /// Immediate grants.
    pub grants: AtomicU64,
    /// Wait verdicts issued.
    pub waits: AtomicU64,
    /// Die verdicts issued.
    pub dies: AtomicU64,
    /// Shared-to-exclusive upgrades.
    pub upgrades: AtomicU64,
}

/// The Wait-Die lock manager.
pub struct WaitDie {
    tables: Mutex<HashMap<String, LockState>>,
    held: Mutex<HashMap<TxnId, HashSet<String>>>,
    stats: WaitDieStats,
}

impl WaitDie {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            stats: WaitDieStats::default(),
        }
    }

    /// Returns the stats counters.
    pub fn stats(&self) -> &WaitDieStats {
        &self.stats
    }

    /// Number of tables with live lock state.
    pub fn lock_count(&self) -> usize {
        self.tables.lock().len()
    }

    /// Tables currently locked by `txn`.
    pub fn tables_held_by(&self, txn: TxnId) -> Vec<String> {
        self.held
            .lock()
            .get(&txn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record_held(&self, txn: TxnId, table: &str) {
        self.held
            .lock()
            .entry(txn)
            .or_default()
            .insert(table.to_string());
    }
}

impl Default for WaitDie {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for WaitDie {
    fn name(&self) -> &'static str {
        "wait-die"
    }

    fn on_begin(&self, _txn: TxnId) {}

    fn validate(
        &self,
        txn: TxnId,
        table: &str,
        _row_key: Option<&str>,
        mode: AccessMode,
    ) -> Verdict {
        let requested = LockMode::from(mode);
        let mut tables = self.tables.lock();
        let state = tables
            .entry(table.to_string())
            .or_insert_with(LockState::new);

        if state.holders.contains(&txn) {
            // Already compatible: holding exclusive covers everything,
            // holding shared covers shared.
            if state.mode == LockMode::Exclusive || requested == LockMode::Shared {
                return Verdict::Grant;
            }
            // Upgrade: allowed only for the sole shared holder.
            if state.holders.len() == 1 {
                state.mode = LockMode::Exclusive;
                self.stats.upgrades.fetch_add(1, Ordering::Relaxed);
                trace!(%txn, table, "lock upgraded to exclusive");
                return Verdict::Grant;
            }
        }

        let compatible = state.holders.is_empty()
            || (!state.holders.contains(&txn) && requested.is_compatible_with(state.mode));
        if compatible {
            state.grant(txn, requested);
            drop(tables);
            self.record_held(txn, table);
            self.stats.grants.fetch_add(1, Ordering::Relaxed);
            return Verdict::Grant;
        }

        // Conflict: age against the oldest holder decides.
        let oldest = match state.oldest_other_holder(txn) {
            Some(h) => h,
            // Sole holder is txn itself but upgrade was refused above
            // (multiple shared holders); fall through with the youngest
            // possible age comparison against the other holders.
            None => txn,
        };
        if txn.is_older_than(oldest) {
            if !state.is_queued(txn) {
                state.wait_queue.push_back((txn, requested));
            }
            self.stats.waits.fetch_add(1, Ordering::Relaxed);
            trace!(%txn, table, holder = %oldest, "older requester waits");
            Verdict::Wait
        } else {
            state.wait_queue.retain(|(t, _)| *t != txn);
            self.stats.dies.fetch_add(1, Ordering::Relaxed);
            debug!(%txn, table, holder = %oldest, "younger requester dies");
            Verdict::Die
        }
    }

    fn on_end(&self, txn: TxnId, _outcome: TxnOutcome) -> DbResult<()> {
        let mut tables = self.tables.lock();
        let mut freed = Vec::new();
        for (table, state) in tables.iter_mut() {
            state.holders.remove(&txn);
            state.wait_queue.retain(|(t, _)| *t != txn);
            state.promote_waiters();
            // Promoted waiters now hold the lock; track them.
            for holder in &state.holders {
                self.held
                    .lock()
                    .entry(*holder)
                    .or_default()
                    .insert(table.clone());
            }
            if state.is_free() {
                freed.push(table.clone());
            }
        }
        for table in freed {
            tables.remove(&table);
        }
        drop(tables);
        self.held.lock().remove(&txn);
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
    fn test_shared_locks_coexist() {
        let wd = WaitDie::new();
        assert_eq!(
            wd.validate(txn(1), "users", None, AccessMode::Read),
            Verdict::Grant
        );
        assert_eq!(
            wd.validate(txn(2), "users", None, AccessMode::Read),
            Verdict::Grant
        );
        assert_eq!(wd.lock_count(), 1);
    }

    #[test]
    fn test_younger_writer_dies() {
        let wd = WaitDie::new();
        assert_eq!(
            wd.validate(txn(3), "accounts", None, AccessMode::Write),
            Verdict::Grant
        );
        // tid=4 is younger than the holder tid=3: die.
        assert_eq!(
            wd.validate(txn(4), "accounts", None, AccessMode::Write),
            Verdict::Die
        );
    }

    #[test]
    fn test_older_writer_waits_then_proceeds() {
        let wd = WaitDie::new();
        assert_eq!(
            wd.validate(txn(4), "accounts", None, AccessMode::Write),
            Verdict::Grant
        );
        // tid=3 is older than the holder tid=4: wait.
        assert_eq!(
            wd.validate(txn(3), "accounts", None, AccessMode::Write),
            Verdict::Wait
        );
        // Holder commits; the waiter is promoted FIFO and re-validation grants.
        wd.on_end(txn(4), TxnOutcome::Commit).unwrap();
        assert_eq!(
            wd.validate(txn(3), "accounts", None, AccessMode::Write),
            Verdict::Grant
        );
    }

    #[test]
    fn test_upgrade_sole_holder() {
        let wd = WaitDie::new();
        assert_eq!(
            wd.validate(txn(1), "users", None, AccessMode::Read),
            Verdict::Grant
        );
        assert_eq!(
            wd.validate(txn(1), "users", None, AccessMode::Write),
            Verdict::Grant
        );
        assert_eq!(wd.stats().upgrades.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_upgrade_blocked_by_other_reader() {
        let wd = WaitDie::new();
        wd.validate(txn(1), "users", None, AccessMode::Read);
        wd.validate(txn(2), "users", None, AccessMode::Read);
        // txn 1 is older than holder txn 2, so the upgrade waits.
        assert_eq!(
            wd.validate(txn(1), "users", None, AccessMode::Write),
            Verdict::Wait
        );
        // txn 2's upgrade attempt conflicts with older holder txn 1: die.
        assert_eq!(
            wd.validate(txn(2), "users", None, AccessMode::Write),
            Verdict::Die
        );
    }

    #[test]
    fn test_release_clears_everything() {
        let wd = WaitDie::new();
        wd.validate(txn(1), "a", None, AccessMode::Write);
        wd.validate(txn(1), "b", None, AccessMode::Read);
        assert_eq!(wd.tables_held_by(txn(1)).len(), 2);
        wd.on_end(txn(1), TxnOutcome::Abort).unwrap();
        assert!(wd.tables_held_by(txn(1)).is_empty());
        assert_eq!(wd.lock_count(), 0);
    }

    #[test]
    fn test_fifo_promotion_of_shared_waiters() {
        let wd = WaitDie::new();
        wd.validate(txn(5), "t", None, AccessMode::Write);
        // Two older readers queue up behind the writer.
        assert_eq!(wd.validate(txn(1), "t", None, AccessMode::Read), Verdict::Wait);
        assert_eq!(wd.validate(txn(2), "t", None, AccessMode::Read), Verdict::Wait);
        wd.on_end(txn(5), TxnOutcome::Commit).unwrap();
        // Both shared waiters were promoted together.
        assert_eq!(wd.validate(txn(1), "t", None, AccessMode::Read), Verdict::Grant);
        assert_eq!(wd.validate(txn(2), "t", None, AccessMode::Read), Verdict::Grant);
    }

    #[test]
    fn test_waits_only_point_older_to_younger() {
        // Any wait edge goes from an older requester to a younger holder,
        // so a cycle would need a younger→older edge, which dies instead.
        let wd = WaitDie::new();
        wd.validate(txn(1), "a", None, AccessMode::Write);
        wd.validate(txn(2), "b", None, AccessMode::Write);
        // txn 1 waits on txn 2 (older → younger).
        assert_eq!(wd.validate(txn(1), "b", None, AccessMode::Write), Verdict::Wait);
        // txn 2 would wait on txn 1 (younger → older): dies, breaking the cycle.
        assert_eq!(wd.validate(txn(2), "a", None, AccessMode::Write), Verdict::Die);
    }
}
