//! In-memory secondary indexes.
//!
//! A hash index serves equality lookups; a B-tree index serves equality and
//! range lookups. Indexes map a column value to the positions of matching
//! rows and are rebuilt whenever the table mutates. Persistence across
//! restarts is out of scope; descriptors still reach the optimizer through
//! the catalog statistics.

use std::collections::{BTreeMap, HashMap};

use briar_common::{Row, Value};

use crate::request::CompareOp;
use crate::stats::IndexKind;

/// An orderable, hashable projection of a [`Value`].
///
/// Floats and NULLs are not indexable; rows holding them in the indexed
/// column simply never appear in the index and fall back to scans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
    /// Boolean key.
    Bool(bool),
}

impl IndexKey {
    /// Projects a value into an index key, if the value is indexable.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        match value {
            Value::Int(i) => Some(IndexKey::Int(*i)),
            Value::Str(s) => Some(IndexKey::Str(s.clone())),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Float(_) | Value::Null => None,
        }
    }
}

/// One index over one column.
#[derive(Debug, Clone)]
pub enum TableIndex {
    /// Hash index: key → row positions.
    Hash(HashMap<IndexKey, Vec<usize>>),
    /// B-tree index: key → row positions, ordered.
    BTree(BTreeMap<IndexKey, Vec<usize>>),
}

impl TableIndex {
    /// Builds an index of `kind` over `column` from the current rows.
    #[must_use]
    pub fn build(kind: IndexKind, column: &str, rows: &[Row]) -> TableIndex {
        match kind {
            IndexKind::Hash => {
                let mut map: HashMap<IndexKey, Vec<usize>> = HashMap::new();
                for (pos, row) in rows.iter().enumerate() {
                    if let Some(key) = row.get(column).and_then(IndexKey::from_value) {
                        map.entry(key).or_default().push(pos);
                    }
                }
                TableIndex::Hash(map)
            }
            IndexKind::BTree => {
                let mut map: BTreeMap<IndexKey, Vec<usize>> = BTreeMap::new();
                for (pos, row) in rows.iter().enumerate() {
                    if let Some(key) = row.get(column).and_then(IndexKey::from_value) {
                        map.entry(key).or_default().push(pos);
                    }
                }
                TableIndex::BTree(map)
            }
        }
    }

    /// Returns this index's kind.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            TableIndex::Hash(_) => IndexKind::Hash,
            TableIndex::BTree(_) => IndexKind::BTree,
        }
    }

    /// Equality lookup.
    #[must_use]
    pub fn lookup_eq(&self, value: &Value) -> Option<Vec<usize>> {
        let key = IndexKey::from_value(value)?;
        match self {
            TableIndex::Hash(map) => map.get(&key).cloned(),
            TableIndex::BTree(map) => map.get(&key).cloned(),
        }
        .or(Some(Vec::new()))
    }

    /// Range lookup; B-tree only.
    #[must_use]
    pub fn lookup_range(&self, op: CompareOp, value: &Value) -> Option<Vec<usize>> {
        let key = IndexKey::from_value(value)?;
        let TableIndex::BTree(map) = self else {
            return None;
        };
        let positions = |iter: &mut dyn Iterator<Item = (&IndexKey, &Vec<usize>)>| {
            iter.flat_map(|(_, v)| v.iter().copied()).collect::<Vec<_>>()
        };
        use std::ops::Bound;
        let result = match op {
            CompareOp::Lt => positions(&mut map.range(..key.clone())),
            CompareOp::LtEq => positions(&mut map.range(..=key.clone())),
            CompareOp::Gt => positions(
                &mut map.range((Bound::Excluded(key.clone()), Bound::Unbounded)),
            ),
            CompareOp::GtEq => positions(&mut map.range(key.clone()..)),
            _ => return None,
        };
        Some(result)
    }

    /// An estimate of the tree height, derived from the entry count. Used
    /// only to feed the cost model's B-tree formulas.
    #[must_use]
    pub fn height_estimate(&self) -> u32 {
        let entries = match self {
            TableIndex::Hash(map) => map.len(),
            TableIndex::BTree(map) => map.len(),
        };
        // Fanout of ~32 keys per node.
        let mut height = 1u32;
        let mut capacity = 32usize;
        while capacity < entries {
            height += 1;
            capacity = capacity.saturating_mul(32);
        }
        height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Row> {
        (0..10)
            .map(|i| {
                Row::from_pairs([
                    ("id".to_string(), Value::Int(i)),
                    ("name".to_string(), Value::string(format!("user{}", i))),
                ])
            })
            .collect()
    }

    #[test]
    fn test_hash_equality() {
        let index = TableIndex::build(IndexKind::Hash, "id", &rows());
        assert_eq!(index.lookup_eq(&Value::Int(3)), Some(vec![3]));
        assert_eq!(index.lookup_eq(&Value::Int(42)), Some(vec![]));
    }

    #[test]
    fn test_btree_range() {
        let index = TableIndex::build(IndexKind::BTree, "id", &rows());
        let found = index.lookup_range(CompareOp::Lt, &Value::Int(3)).unwrap();
        assert_eq!(found, vec![0, 1, 2]);
        let found = index.lookup_range(CompareOp::GtEq, &Value::Int(8)).unwrap();
        assert_eq!(found, vec![8, 9]);
    }

    #[test]
    fn test_hash_has_no_range() {
        let index = TableIndex::build(IndexKind::Hash, "id", &rows());
        assert!(index.lookup_range(CompareOp::Lt, &Value::Int(3)).is_none());
    }

    #[test]
    fn test_nulls_and_floats_not_indexed() {
        let mut data = rows();
        data.push(Row::from_pairs([
            ("id".to_string(), Value::Null),
            ("name".to_string(), Value::string("ghost")),
        ]));
        let index = TableIndex::build(IndexKind::BTree, "id", &data);
        // The NULL row is invisible to the index.
        let all = index.lookup_range(CompareOp::GtEq, &Value::Int(0)).unwrap();
        assert_eq!(all.len(), 10);
    }
}
