//! Timestamp-ordering concurrency control.
//!
//! Each transaction carries a monotonic start timestamp (its ID); each object
//! tracks the largest read and write timestamps it has seen. Out-of-order
//! accesses die immediately; there are no waits.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use briar_common::{DbResult, TxnId};

use crate::protocol::{AccessMode, Protocol, TxnOutcome, Verdict};

#[derive(Debug, Default, Clone, Copy)]
struct ObjectTimestamps {
    read_ts: u64,
    write_ts: u64,
}

/// The timestamp-ordering variant.
pub struct TimestampOrdering {
    objects: Mutex<HashMap<String, ObjectTimestamps>>,
}

impl TimestampOrdering {
    /// Creates an empty timestamp table.
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(R-TS, W-TS)` for an object, for tests and debugging.
    pub fn timestamps(&self, table: &str) -> (u64, u64) {
        let objects = self.objects.lock();
        let ts = objects.get(table).copied().unwrap_or_default();
        (ts.read_ts, ts.write_ts)
    }
}

impl Default for TimestampOrdering {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for TimestampOrdering {
    fn name(&self) -> &'static str {
        "timestamp-ordering"
    }

    fn on_begin(&self, _txn: TxnId) {}

    fn validate(
        &self,
        txn: TxnId,
        table: &str,
        _row_key: Option<&str>,
        mode: AccessMode,
    ) -> Verdict {
        let ts = txn.as_u64();
        let mut objects = self.objects.lock();
        let entry = objects.entry(table.to_string()).or_default();
        match mode {
            AccessMode::Read => {
                if ts >= entry.write_ts {
                    entry.read_ts = entry.read_ts.max(ts);
                    Verdict::Grant
                } else {
                    debug!(%txn, table, w_ts = entry.write_ts, "read behind writer, die");
                    Verdict::Die
                }
            }
            AccessMode::Write => {
                if ts >= entry.read_ts && ts >= entry.write_ts {
                    entry.write_ts = ts;
                    Verdict::Grant
                } else {
                    debug!(
                        %txn, table,
                        r_ts = entry.read_ts,
                        w_ts = entry.write_ts,
                        "write out of order, die"
                    );
                    Verdict::Die
                }
            }
        }
    }

    fn on_end(&self, _txn: TxnId, _outcome: TxnOutcome) -> DbResult<()> {
        // Object timestamps outlive the transaction; nothing to release.
        Ok(())
    }
}
