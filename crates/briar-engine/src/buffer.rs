//! Per-transaction write buffering and commit-time collapse.

use briar_common::{Row, Value};

/// The kind of a buffered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Row insertion; only the new image is present.
    Insert,
    /// Row update; both images are present.
    Update,
    /// Row deletion; only the old image is present.
    Delete,
}

/// One buffered write, ordered within its transaction.
#[derive(Debug, Clone)]
pub struct BufferedOp {
    /// The operation kind.
    pub kind: OpKind,
    /// Target table.
    pub table: String,
    /// Pre-image; absent for inserts.
    pub old: Option<Row>,
    /// Post-image; absent for deletes.
    pub new: Option<Row>,
}

impl BufferedOp {
    /// Creates a buffered insert.
    pub fn insert(table: impl Into<String>, new: Row) -> Self {
        Self {
            kind: OpKind::Insert,
            table: table.into(),
            old: None,
            new: Some(new),
        }
    }

    /// Creates a buffered update.
    pub fn update(table: impl Into<String>, old: Row, new: Row) -> Self {
        Self {
            kind: OpKind::Update,
            table: table.into(),
            old: Some(old),
            new: Some(new),
        }
    }

    /// Creates a buffered delete.
    pub fn delete(table: impl Into<String>, old: Row) -> Self {
        Self {
            kind: OpKind::Delete,
            table: table.into(),
            old: Some(old),
            new: None,
        }
    }
}

/// Identity of a row within one transaction: the primary key value when the
/// table declares one, otherwise the full old-row image.
#[derive(Debug, Clone, PartialEq)]
pub enum RowKey {
    /// Primary key value.
    Primary(Value),
    /// Full-row identity.
    WholeRow(Row),
}

impl RowKey {
    /// Derives the key of `row` given the table's primary key column.
    pub fn of(row: &Row, primary_key: Option<&str>) -> RowKey {
        match primary_key.and_then(|pk| row.get(pk)) {
            Some(value) if !value.is_null() => RowKey::Primary(value.clone()),
            _ => RowKey::WholeRow(row.clone()),
        }
    }

    fn matches(&self, other: &RowKey) -> bool {
        match (self, other) {
            (RowKey::Primary(a), RowKey::Primary(b)) => a.eq_coerced(b),
            (RowKey::WholeRow(a), RowKey::WholeRow(b)) => a.same_identity(b),
            _ => false,
        }
    }
}

/// One collapsed group, ready for the batched storage API.
#[derive(Debug)]
pub struct CollapsedGroup {
    /// The operation kind of the group.
    pub kind: OpKind,
    /// Target table.
    pub table: String,
    /// Rows to insert (`Insert` groups).
    pub inserts: Vec<Row>,
    /// `(first_old, last_new)` pairs (`Update` groups).
    pub updates: Vec<(Row, Row)>,
    /// Rows to delete (`Delete` groups).
    pub deletes: Vec<Row>,
}

/// A transaction's write buffer.
///
/// Operations are kept in insertion order. The flushed watermark records
/// how many leading operations a checkpoint already pushed into storage;
/// commit collapses and flushes only the tail beyond it.
#[derive(Debug, Default)]
pub struct TxnBuffer {
    ops: Vec<BufferedOp>,
    flushed: usize,
}

impl TxnBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    pub fn push(&mut self, op: BufferedOp) {
        self.ops.push(op);
    }

    /// All operations in insertion order.
    pub fn ops(&self) -> &[BufferedOp] {
        &self.ops
    }

    /// Operations for one table, for the executor's post-buffer view.
    pub fn ops_for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a BufferedOp> {
        self.ops.iter().filter(move |op| op.table == table)
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The not-yet-flushed tail.
    pub fn unflushed(&self) -> &[BufferedOp] {
        &self.ops[self.flushed..]
    }

    /// Marks every buffered operation as flushed (checkpoint).
    pub fn mark_flushed(&mut self) {
        self.flushed = self.ops.len();
    }

    /// Discards everything (commit cleanup or abort).
    pub fn clear(&mut self) {
        self.ops.clear();
        self.flushed = 0;
    }

    /// Collapses the unflushed tail into batched groups.
    ///
    /// Groups form per `(table, kind)` in first-appearance order. Within an
    /// update group, repeated updates to the same row identity collapse to
    /// one `(first_old, last_new)` pair; updates that net to no change are
    /// dropped. `primary_key_of` resolves a table's primary key column.
    pub fn collapse_unflushed(
        &self,
        primary_key_of: impl Fn(&str) -> Option<String>,
    ) -> Vec<CollapsedGroup> {
        let mut groups: Vec<CollapsedGroup> = Vec::new();

        for op in self.unflushed() {
            let position = groups
                .iter()
                .position(|g| g.kind == op.kind && g.table == op.table);
            let group = match position {
                Some(pos) => &mut groups[pos],
                None => {
                    groups.push(CollapsedGroup {
                        kind: op.kind,
                        table: op.table.clone(),
                        inserts: Vec::new(),
                        updates: Vec::new(),
                        deletes: Vec::new(),
                    });
                    groups.last_mut().expect("just pushed")
                }
            };
            match op.kind {
                OpKind::Insert => {
                    if let Some(new) = &op.new {
                        group.inserts.push(new.clone());
                    }
                }
                OpKind::Delete => {
                    if let Some(old) = &op.old {
                        group.deletes.push(old.clone());
                    }
                }
                OpKind::Update => {
                    let (Some(old), Some(new)) = (&op.old, &op.new) else {
                        continue;
                    };
                    let pk = primary_key_of(&op.table);
                    let key = RowKey::of(old, pk.as_deref());
                    let existing = group.updates.iter_mut().find(|(first_old, _)| {
                        RowKey::of(first_old, pk.as_deref()).matches(&key)
                    });
                    match existing {
                        Some((_, last_new)) => *last_new = new.clone(),
                        None => group.updates.push((old.clone(), new.clone())),
                    }
                }
            }
        }

        for group in &mut groups {
            if group.kind == OpKind::Update {
                group.updates.retain(|(old, new)| !old.same_identity(new));
            }
        }
        groups.retain(|g| !g.inserts.is_empty() || !g.updates.is_empty() || !g.deletes.is_empty());
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, score: i64, status: &str) -> Row {
        Row::from_pairs([
            ("id".to_string(), Value::Int(id)),
            ("score".to_string(), Value::Int(score)),
            ("status".to_string(), Value::string(status)),
        ])
    }

    fn pk_users(table: &str) -> Option<String> {
        (table == "users").then(|| "id".to_string())
    }

    #[test]
    fn test_repeated_updates_collapse_to_one_pair() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::update(
            "users",
            row(1, 100, "active"),
            row(1, 150, "active"),
        ));
        buffer.push(BufferedOp::update(
            "users",
            row(1, 150, "active"),
            row(1, 200, "active"),
        ));
        buffer.push(BufferedOp::update(
            "users",
            row(1, 200, "active"),
            row(1, 200, "premium"),
        ));

        let groups = buffer.collapse_unflushed(pk_users);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].updates.len(), 1);
        let (old, new) = &groups[0].updates[0];
        assert_eq!(old, &row(1, 100, "active"));
        assert_eq!(new, &row(1, 200, "premium"));
    }

    #[test]
    fn test_no_net_change_is_dropped() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::update(
            "users",
            row(1, 100, "active"),
            row(1, 150, "active"),
        ));
        buffer.push(BufferedOp::update(
            "users",
            row(1, 150, "active"),
            row(1, 100, "active"),
        ));
        let groups = buffer.collapse_unflushed(pk_users);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_distinct_rows_stay_distinct() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::update(
            "users",
            row(1, 100, "a"),
            row(1, 101, "a"),
        ));
        buffer.push(BufferedOp::update(
            "users",
            row(2, 200, "b"),
            row(2, 201, "b"),
        ));
        let groups = buffer.collapse_unflushed(pk_users);
        assert_eq!(groups[0].updates.len(), 2);
    }

    #[test]
    fn test_whole_row_identity_without_primary_key() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::update(
            "logs",
            row(1, 100, "x"),
            row(1, 110, "x"),
        ));
        buffer.push(BufferedOp::update(
            "logs",
            row(1, 110, "x"),
            row(1, 120, "x"),
        ));
        // No primary key: identity is the full old-row image. The two old
        // images differ, so the chain stays as two ordered pairs.
        let groups = buffer.collapse_unflushed(|_| None);
        assert_eq!(groups[0].updates.len(), 2);
    }

    #[test]
    fn test_flushed_watermark_excludes_prefix() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::insert("t", row(1, 0, "a")));
        buffer.mark_flushed();
        buffer.push(BufferedOp::insert("t", row(2, 0, "b")));
        assert_eq!(buffer.unflushed().len(), 1);
        let groups = buffer.collapse_unflushed(|_| None);
        assert_eq!(groups[0].inserts.len(), 1);
    }

    #[test]
    fn test_groups_by_table_and_kind() {
        let mut buffer = TxnBuffer::new();
        buffer.push(BufferedOp::insert("a", row(1, 0, "x")));
        buffer.push(BufferedOp::delete("b", row(2, 0, "y")));
        buffer.push(BufferedOp::insert("a", row(3, 0, "z")));
        let groups = buffer.collapse_unflushed(|_| None);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].inserts.len(), 2);
        assert_eq!(groups[1].deletes.len(), 1);
    }
}
