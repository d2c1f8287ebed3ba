//! WAL record types and their line encoding.

use std::fmt;

use briar_common::{DbError, DbResult, Row, TxnId};

/// One write-ahead log record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// Transaction start.
    Begin(TxnId),
    /// One write: for an insert `old` is absent, for a delete `new` is
    /// absent, for an update both images are present.
    Write {
        /// The writing transaction.
        txn: TxnId,
        /// The written table.
        table: String,
        /// Pre-image.
        old: Option<Row>,
        /// Post-image.
        new: Option<Row>,
    },
    /// Transaction commit.
    Commit(TxnId),
    /// Transaction abort.
    Abort(TxnId),
    /// Checkpoint marker: everything before it is durable in storage.
    Checkpoint,
}

impl WalRecord {
    /// Returns the transaction this record belongs to, if any.
    #[must_use]
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            WalRecord::Begin(txn)
            | WalRecord::Commit(txn)
            | WalRecord::Abort(txn) => Some(*txn),
            WalRecord::Write { txn, .. } => Some(*txn),
            WalRecord::Checkpoint => None,
        }
    }

    /// Encodes the record as one log line.
    pub fn encode(&self) -> DbResult<String> {
        let json = |row: &Option<Row>| -> DbResult<String> {
            match row {
                Some(row) => serde_json::to_string(row).map_err(|e| DbError::LogWriteFailed {
                    message: format!("row encoding failed: {}", e),
                }),
                None => Ok("null".to_string()),
            }
        };
        Ok(match self {
            WalRecord::Begin(txn) => format!("BEGIN,{}", txn),
            WalRecord::Write {
                txn,
                table,
                old,
                new,
            } => format!("WRITE,{},{},{},{}", txn, table, json(old)?, json(new)?),
            WalRecord::Commit(txn) => format!("COMMIT,{}", txn),
            WalRecord::Abort(txn) => format!("ABORT,{}", txn),
            WalRecord::Checkpoint => "CHECKPOINT".to_string(),
        })
    }

    /// Parses one log line.
    pub fn parse(line: &str) -> DbResult<WalRecord> {
        let corrupt = |why: &str| DbError::Internal {
            message: format!("corrupt WAL line '{}': {}", line, why),
        };
        let parse_txn = |text: &str| -> DbResult<TxnId> {
            text.parse::<u64>()
                .map(TxnId::new)
                .map_err(|_| corrupt("bad transaction id"))
        };

        let (tag, rest) = match line.split_once(',') {
            Some((tag, rest)) => (tag, rest),
            None => (line, ""),
        };
        match tag {
            "BEGIN" => Ok(WalRecord::Begin(parse_txn(rest)?)),
            "COMMIT" => Ok(WalRecord::Commit(parse_txn(rest)?)),
            "ABORT" => Ok(WalRecord::Abort(parse_txn(rest)?)),
            "CHECKPOINT" => Ok(WalRecord::Checkpoint),
            "WRITE" => {
                let (txn_text, rest) =
                    rest.split_once(',').ok_or_else(|| corrupt("missing table"))?;
                let (table, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| corrupt("missing row images"))?;
                let (old, new) = parse_row_pair(payload)
                    .ok_or_else(|| corrupt("bad row images"))?;
                Ok(WalRecord::Write {
                    txn: parse_txn(txn_text)?,
                    table: table.to_string(),
                    old,
                    new,
                })
            }
            _ => Err(corrupt("unknown record tag")),
        }
    }
}

/// Parses `<old_json|null>,<new_json|null>`. The images themselves may
/// contain commas, so the split point comes from the JSON parser.
fn parse_row_pair(payload: &str) -> Option<(Option<Row>, Option<Row>)> {
    let mut stream = serde_json::Deserializer::from_str(payload)
        .into_iter::<serde_json::Value>();
    let old = stream.next()?.ok()?;
    let rest = payload[stream.byte_offset()..].trim_start();
    let new_text = rest.strip_prefix(',')?;
    let new: serde_json::Value = serde_json::from_str(new_text).ok()?;

    let to_row = |value: serde_json::Value| -> Option<Option<Row>> {
        if value.is_null() {
            Some(None)
        } else {
            serde_json::from_value::<Row>(value).ok().map(Some)
        }
    };
    Some((to_row(old)?, to_row(new)?))
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(line) => write!(f, "{}", line),
            Err(_) => write!(f, "<unencodable record>"),
        }
    }
}

/// One physical operation against storage, produced by redo or undo replay.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    /// Insert a row (skipped if an identical row is already present).
    Insert {
        /// Target table.
        table: String,
        /// The row to insert.
        row: Row,
    },
    /// Delete a row by exact match (a missing row is a no-op).
    Delete {
        /// Target table.
        table: String,
        /// The row to delete.
        row: Row,
    },
    /// Replace `old` with `new` (a missing `old` is a no-op).
    Update {
        /// Target table.
        table: String,
        /// The image to find.
        old: Row,
        /// The image to install.
        new: Row,
    },
}

impl StorageOp {
    /// The inverse of a logged write: insert ↔ delete, update with the
    /// images swapped.
    #[must_use]
    pub fn undo_of(table: &str, old: &Option<Row>, new: &Option<Row>) -> Option<StorageOp> {
        match (old, new) {
            (None, Some(new)) => Some(StorageOp::Delete {
                table: table.to_string(),
                row: new.clone(),
            }),
            (Some(old), None) => Some(StorageOp::Insert {
                table: table.to_string(),
                row: old.clone(),
            }),
            (Some(old), Some(new)) => Some(StorageOp::Update {
                table: table.to_string(),
                old: new.clone(),
                new: old.clone(),
            }),
            (None, None) => None,
        }
    }

    /// The forward replay of a logged write.
    #[must_use]
    pub fn redo_of(table: &str, old: &Option<Row>, new: &Option<Row>) -> Option<StorageOp> {
        match (old, new) {
            (None, Some(new)) => Some(StorageOp::Insert {
                table: table.to_string(),
                row: new.clone(),
            }),
            (Some(old), None) => Some(StorageOp::Delete {
                table: table.to_string(),
                row: old.clone(),
            }),
            (Some(old), Some(new)) => Some(StorageOp::Update {
                table: table.to_string(),
                old: old.clone(),
                new: new.clone(),
            }),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briar_common::Value;

    fn row(id: i64, status: &str) -> Row {
        Row::from_pairs([
            ("id".to_string(), Value::Int(id)),
            ("status".to_string(), Value::string(status)),
        ])
    }

    #[test]
    fn test_simple_round_trips() {
        for record in [
            WalRecord::Begin(TxnId::new(7)),
            WalRecord::Commit(TxnId::new(7)),
            WalRecord::Abort(TxnId::new(7)),
            WalRecord::Checkpoint,
        ] {
            let line = record.encode().unwrap();
            assert_eq!(WalRecord::parse(&line).unwrap(), record);
        }
    }

    #[test]
    fn test_write_round_trip_with_commas_in_rows() {
        let record = WalRecord::Write {
            txn: TxnId::new(3),
            table: "users".to_string(),
            old: Some(row(1, "a,b,c")),
            new: Some(row(1, "x,y")),
        };
        let line = record.encode().unwrap();
        assert_eq!(WalRecord::parse(&line).unwrap(), record);
    }

    #[test]
    fn test_insert_and_delete_images() {
        let insert = WalRecord::Write {
            txn: TxnId::new(2),
            table: "t".to_string(),
            old: None,
            new: Some(row(9, "new")),
        };
        let line = insert.encode().unwrap();
        assert!(line.starts_with("WRITE,2,t,null,"));
        assert_eq!(WalRecord::parse(&line).unwrap(), insert);

        let delete = WalRecord::Write {
            txn: TxnId::new(2),
            table: "t".to_string(),
            old: Some(row(9, "old")),
            new: None,
        };
        let line = delete.encode().unwrap();
        assert!(line.ends_with(",null"));
        assert_eq!(WalRecord::parse(&line).unwrap(), delete);
    }

    #[test]
    fn test_undo_inverts() {
        let old = Some(row(1, "before"));
        let new = Some(row(1, "after"));
        match StorageOp::undo_of("t", &old, &new).unwrap() {
            StorageOp::Update { old: o, new: n, .. } => {
                assert_eq!(o, row(1, "after"));
                assert_eq!(n, row(1, "before"));
            }
            other => panic!("unexpected op {:?}", other),
        }
        assert!(matches!(
            StorageOp::undo_of("t", &None, &new).unwrap(),
            StorageOp::Delete { .. }
        ));
        assert!(matches!(
            StorageOp::undo_of("t", &old, &None).unwrap(),
            StorageOp::Insert { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(WalRecord::parse("NONSENSE,1").is_err());
        assert!(WalRecord::parse("WRITE,1,users").is_err());
        assert!(WalRecord::parse("BEGIN,notanumber").is_err());
    }
}
