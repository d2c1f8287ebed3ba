//! Per-table statistics consumed by the query optimizer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Hash index; equality lookups only.
    Hash,
    /// B-tree index; equality and range lookups.
    BTree,
}

/// Description of an index over one column, as the cost model sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// The index kind.
    pub kind: IndexKind,
    /// Tree height for B-tree indexes; unused for hash.
    pub height: u32,
}

impl IndexDescriptor {
    /// Creates a hash index descriptor.
    pub fn hash() -> Self {
        Self {
            kind: IndexKind::Hash,
            height: 0,
        }
    }

    /// Creates a B-tree index descriptor of the given height.
    pub fn btree(height: u32) -> Self {
        Self {
            kind: IndexKind::BTree,
            height,
        }
    }
}

/// Statistics for one table.
///
/// The catalog is the single source of truth; numbers may be stale but are
/// never inconsistent with the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistic {
    /// Number of tuples in the relation.
    pub n_r: u64,
    /// Number of blocks holding tuples of the relation,
    /// `ceil(n_r / f_r)`.
    pub b_r: u64,
    /// Tuple size in bytes.
    pub l_r: u64,
    /// Blocking factor: tuples per block.
    pub f_r: u64,
    /// Distinct-value estimate per column, `V(a, r)`.
    pub v_a_r: HashMap<String, u64>,
    /// Index descriptors per column.
    pub indexes: HashMap<String, IndexDescriptor>,
}

impl Statistic {
    /// An empty-table statistic.
    pub fn empty() -> Self {
        Self {
            n_r: 0,
            b_r: 0,
            l_r: 0,
            f_r: 1,
            v_a_r: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    /// Distinct-value estimate for `column`, falling back to `n_r` when the
    /// column was never measured.
    #[must_use]
    pub fn distinct(&self, column: &str) -> u64 {
        self.v_a_r
            .get(column)
            .copied()
            .unwrap_or_else(|| self.n_r.max(1))
    }

    /// Returns the index on `column`, if any.
    #[must_use]
    pub fn index_on(&self, column: &str) -> Option<&IndexDescriptor> {
        self.indexes.get(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_fallback() {
        let mut stat = Statistic::empty();
        stat.n_r = 500;
        stat.v_a_r.insert("id".to_string(), 500);
        assert_eq!(stat.distinct("id"), 500);
        assert_eq!(stat.distinct("unmeasured"), 500);
    }

    #[test]
    fn test_index_lookup() {
        let mut stat = Statistic::empty();
        stat.indexes
            .insert("id".to_string(), IndexDescriptor::btree(3));
        assert!(matches!(
            stat.index_on("id").map(|i| i.kind),
            Some(IndexKind::BTree)
        ));
        assert!(stat.index_on("name").is_none());
    }
}
