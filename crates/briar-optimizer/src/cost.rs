//! The cost model.
//!
//! Cost = I/O cost + CPU cost, estimated bottom-up over the plan tree using
//! catalog statistics. Filters are pipelined (I/O passes through from the
//! source, CPU pays per conjunct per row); joins dispatch on the annotated
//! method; index access uses the descriptor in the table statistics.

use std::collections::HashMap;

use briar_storage::{IndexKind, Statistic};
use briar_tree::refs::{collect_conjuncts, extract_column_name};
use briar_tree::{JoinMethod, NodeType, QueryNode};

/// Calibration parameters of the cost model.
#[derive(Debug, Clone)]
pub struct CostParams {
    /// Cost of one sequential block read.
    pub seq_io: f64,
    /// Cost of one random block read.
    pub random_io: f64,
    /// Cost of one block write.
    pub write_io: f64,
    /// CPU cost of producing one tuple.
    pub cpu_per_tuple: f64,
    /// CPU cost of one predicate comparison.
    pub cpu_per_compare: f64,
    /// CPU cost of hashing one tuple.
    pub cpu_per_hash: f64,
    /// CPU cost of one sort comparison.
    pub cpu_per_sort_compare: f64,
    /// Memory budget in blocks for hash joins.
    pub hash_memory_blocks: f64,
    /// Memory budget in blocks for sorting.
    pub sort_memory_blocks: f64,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            seq_io: 1.0,
            random_io: 1.5,
            write_io: 2.0,
            cpu_per_tuple: 0.01,
            cpu_per_compare: 0.001,
            cpu_per_hash: 0.005,
            cpu_per_sort_compare: 0.002,
            hash_memory_blocks: 100.0,
            sort_memory_blocks: 10.0,
        }
    }
}

/// Cost estimate for a plan or sub-plan.
#[derive(Debug, Clone, Default)]
pub struct CostEstimate {
    /// Estimated I/O cost in block accesses.
    pub io_cost: f64,
    /// Estimated CPU cost.
    pub cpu_cost: f64,
    /// Estimated output cardinality.
    pub rows: f64,
    /// Estimated output size in blocks.
    pub blocks: f64,
}

impl CostEstimate {
    /// Total cost: I/O plus CPU.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.io_cost + self.cpu_cost
    }
}

/// Statistics snapshot keyed by table name.
pub type StatsMap = HashMap<String, Statistic>;

/// The cost model.
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    /// Calibration parameters.
    pub params: CostParams,
}

impl CostModel {
    /// Creates a model with default calibration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimates the cost of a plan.
    pub fn estimate(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        match node.node_type {
            NodeType::Relation => self.estimate_scan(&node.value, stats),
            NodeType::Alias => match node.get_child(0) {
                Some(child) => self.estimate(child, stats),
                None => CostEstimate::default(),
            },
            NodeType::Project => {
                // Pipelined; the source is the last child.
                match node.children.last() {
                    Some(source) => self.estimate(source, stats),
                    None => CostEstimate::default(),
                }
            }
            NodeType::Filter => self.estimate_filter(node, stats),
            NodeType::Join => self.estimate_join(node, stats),
            NodeType::Sort => self.estimate_sort(node, stats),
            NodeType::Limit => self.estimate_limit(node, stats),
            NodeType::InsertQuery => CostEstimate {
                io_cost: self.params.write_io,
                rows: 1.0,
                ..CostEstimate::default()
            },
            NodeType::UpdateQuery | NodeType::DeleteQuery => {
                let mut cost = self.sum_children(node, stats);
                cost.io_cost += cost.blocks.max(1.0) * self.params.write_io;
                cost
            }
            NodeType::BeginTransaction => {
                let mut total = CostEstimate::default();
                for child in &node.children {
                    if !child.is_type(NodeType::Commit) {
                        let c = self.estimate(child, stats);
                        total.io_cost += c.io_cost;
                        total.cpu_cost += c.cpu_cost;
                    }
                }
                total
            }
            NodeType::CreateTable | NodeType::DropTable => CostEstimate {
                io_cost: 1.0,
                ..CostEstimate::default()
            },
            _ => self.sum_children(node, stats),
        }
    }

    fn sum_children(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        let mut total = CostEstimate::default();
        for child in &node.children {
            let c = self.estimate(child, stats);
            total.io_cost += c.io_cost;
            total.cpu_cost += c.cpu_cost;
            total.rows = total.rows.max(c.rows);
            total.blocks = total.blocks.max(c.blocks);
        }
        total
    }

    fn estimate_scan(&self, table: &str, stats: &StatsMap) -> CostEstimate {
        let Some(stat) = stats.get(table) else {
            // An unknown table gets a deliberately pessimistic default.
            return CostEstimate {
                io_cost: 1000.0,
                cpu_cost: 10.0,
                rows: 1000.0,
                blocks: 100.0,
            };
        };
        let n_r = stat.n_r as f64;
        let b_r = stat.b_r as f64;
        CostEstimate {
            io_cost: b_r * self.params.seq_io,
            cpu_cost: n_r * self.params.cpu_per_tuple,
            rows: n_r,
            blocks: b_r,
        }
    }

    fn estimate_filter(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        let (Some(source), Some(condition)) = (node.get_child(0), node.get_child(1)) else {
            return CostEstimate::default();
        };

        // A filter directly over a base table can use an index.
        if let Some(table) = base_table(source) {
            if let Some(stat) = stats.get(table) {
                if let Some(cost) = self.try_index_scan(condition, stat) {
                    return cost;
                }
            }
        }

        let source_cost = self.estimate(source, stats);
        let table = base_table(source);
        let selectivity = self.selectivity(condition, table, stats);
        let conjuncts = collect_conjuncts(condition).len() as f64;
        let rows = source_cost.rows * selectivity;
        CostEstimate {
            io_cost: source_cost.io_cost,
            cpu_cost: source_cost.cpu_cost
                + source_cost.rows * conjuncts * self.params.cpu_per_compare,
            rows,
            blocks: scale_blocks(source_cost.blocks, selectivity),
        }
    }

    fn try_index_scan(&self, condition: &QueryNode, stat: &Statistic) -> Option<CostEstimate> {
        let (column, op) = match condition.node_type {
            NodeType::Comparison => {
                let column = extract_column_name(condition.get_child(0)?)?;
                let literal = condition.get_child(1)?;
                if !literal.node_type.is_literal() {
                    return None;
                }
                (column, condition.value.as_str())
            }
            _ => return None,
        };
        let descriptor = stat.index_on(&column)?;
        let selectivity = match op {
            "=" => 1.0 / stat.distinct(&column) as f64,
            "<" | "<=" | ">" | ">=" => 0.33,
            _ => return None,
        };
        let rows = (stat.n_r as f64 * selectivity).max(1.0);
        let data_blocks = (rows / stat.f_r as f64).ceil().max(1.0);

        let io_cost = match (descriptor.kind, op) {
            (IndexKind::Hash, "=") => {
                self.params.random_io + data_blocks * self.params.seq_io
            }
            (IndexKind::Hash, _) => return None,
            (IndexKind::BTree, "=") => {
                (descriptor.height as f64 + 1.0) * self.params.random_io
                    + data_blocks * self.params.seq_io
            }
            (IndexKind::BTree, _) => {
                let leaf_scan = (data_blocks / 10.0).max(1.0) * self.params.seq_io;
                (descriptor.height as f64 + 1.0) * self.params.random_io
                    + leaf_scan
                    + data_blocks * self.params.random_io
            }
        };
        Some(CostEstimate {
            io_cost,
            cpu_cost: rows * self.params.cpu_per_tuple,
            rows,
            blocks: data_blocks,
        })
    }

    fn estimate_join(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        let (Some(left), Some(right)) = (node.get_child(0), node.get_child(1)) else {
            return CostEstimate::default();
        };
        let left_cost = self.estimate(left, stats);
        let right_cost = self.estimate(right, stats);
        let condition = node.get_child(2);

        let rows = self.join_cardinality(node, &left_cost, &right_cost, stats);
        let blocks = (rows / 10.0).ceil().max(1.0);
        let method = node.method.unwrap_or(JoinMethod::NestedLoop);

        let (io_cost, cpu_cost) = match method {
            JoinMethod::NestedLoop => {
                let io = left_cost.io_cost
                    + left_cost.blocks.max(1.0) * right_cost.blocks.max(1.0) * self.params.seq_io;
                let cpu = left_cost.cpu_cost
                    + right_cost.cpu_cost
                    + left_cost.rows * right_cost.rows * self.params.cpu_per_compare;
                (io, cpu)
            }
            JoinMethod::Hash => {
                let (build, probe) = if left_cost.blocks <= right_cost.blocks {
                    (&left_cost, &right_cost)
                } else {
                    (&right_cost, &left_cost)
                };
                let io = if build.blocks <= self.params.hash_memory_blocks {
                    build.io_cost + probe.io_cost + build.blocks * self.params.write_io
                } else {
                    // Grace hash: partition both sides, then join.
                    (3.0 * (build.blocks + probe.blocks)) * self.params.seq_io
                        + build.io_cost
                        + probe.io_cost
                };
                let cpu = left_cost.cpu_cost
                    + right_cost.cpu_cost
                    + (build.rows + probe.rows) * self.params.cpu_per_hash;
                (io, cpu)
            }
            JoinMethod::IndexNestedLoop => {
                let inner_table = base_table(right);
                let lookup_cost = inner_table
                    .and_then(|t| stats.get(t))
                    .and_then(|stat| {
                        let column = condition.and_then(equi_join_column)?;
                        let descriptor = stat.index_on(&column)?;
                        Some(match descriptor.kind {
                            IndexKind::Hash => self.params.random_io,
                            IndexKind::BTree => {
                                (descriptor.height as f64 + 1.0) * self.params.random_io
                            }
                        })
                    })
                    // Without a usable index the method should have been
                    // rejected; price it like a missing index anyway.
                    .unwrap_or(self.params.random_io * 4.0);
                let io = left_cost.io_cost + left_cost.rows * lookup_cost + blocks;
                let cpu = left_cost.cpu_cost
                    + right_cost.cpu_cost
                    + left_cost.rows * self.params.cpu_per_compare;
                (io, cpu)
            }
        };

        CostEstimate {
            io_cost,
            cpu_cost,
            rows,
            blocks,
        }
    }

    fn join_cardinality(
        &self,
        node: &QueryNode,
        left: &CostEstimate,
        right: &CostEstimate,
        stats: &StatsMap,
    ) -> f64 {
        match node.value.as_str() {
            "NATURAL" => (left.rows * right.rows).sqrt(),
            "CROSS" => left.rows * right.rows,
            _ => {
                // Equi-join: n1 * n2 / max distinct of the join column.
                if let Some(condition) = node.get_child(2) {
                    if let Some(column) = equi_join_column(condition) {
                        let distinct = stats
                            .values()
                            .map(|s| s.distinct(&column))
                            .max()
                            .unwrap_or(1)
                            .max(1) as f64;
                        return (left.rows * right.rows / distinct).max(1.0);
                    }
                }
                left.rows * right.rows * 0.1
            }
        }
    }

    fn estimate_sort(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        let Some(source) = node.get_child(0) else {
            return CostEstimate::default();
        };
        let source_cost = self.estimate(source, stats);
        let b = source_cost.blocks.max(1.0);
        let m = self.params.sort_memory_blocks;
        let passes = if b <= m {
            0.0
        } else {
            (b / m).log(m - 1.0).ceil().max(1.0)
        };
        let n = source_cost.rows.max(2.0);
        CostEstimate {
            io_cost: source_cost.io_cost + 2.0 * b * (passes + 1.0),
            cpu_cost: source_cost.cpu_cost + n * n.log2() * self.params.cpu_per_sort_compare,
            rows: source_cost.rows,
            blocks: source_cost.blocks,
        }
    }

    fn estimate_limit(&self, node: &QueryNode, stats: &StatsMap) -> CostEstimate {
        let Some(source) = node.get_child(0) else {
            return CostEstimate::default();
        };
        let source_cost = self.estimate(source, stats);
        let limit: f64 = node.value.parse().unwrap_or(100.0);
        let ratio = if source_cost.rows > 0.0 {
            (limit / source_cost.rows).min(1.0)
        } else {
            1.0
        };
        CostEstimate {
            io_cost: source_cost.io_cost * ratio,
            cpu_cost: source_cost.cpu_cost * ratio,
            rows: limit.min(source_cost.rows),
            blocks: scale_blocks(source_cost.blocks, ratio),
        }
    }

    /// Estimated fraction of input rows satisfying `condition`.
    pub fn selectivity(
        &self,
        condition: &QueryNode,
        table: Option<&str>,
        stats: &StatsMap,
    ) -> f64 {
        match condition.node_type {
            NodeType::Comparison => match condition.value.as_str() {
                "=" => self.equality_selectivity(condition, table, stats),
                "<" | "<=" | ">" | ">=" => 0.33,
                "!=" | "<>" => 1.0 - self.equality_selectivity(condition, table, stats),
                _ => 0.1,
            },
            NodeType::Operator => match condition.value.as_str() {
                "AND" => condition
                    .children
                    .iter()
                    .map(|c| self.selectivity(c, table, stats))
                    .product(),
                "OR" => {
                    let mut total = 0.0;
                    for child in &condition.children {
                        let s = self.selectivity(child, table, stats);
                        total = total + s - total * s;
                    }
                    total
                }
                "NOT" => match condition.get_child(0) {
                    Some(child) => 1.0 - self.selectivity(child, table, stats),
                    None => 0.5,
                },
                _ => 0.1,
            },
            NodeType::BetweenExpr => 0.25,
            NodeType::LikeExpr => 0.05,
            NodeType::InExpr => 0.3,
            NodeType::NotInExpr => 0.7,
            NodeType::ExistsExpr => 0.5,
            NodeType::NotExistsExpr => 0.5,
            NodeType::IsNullExpr => 0.01,
            NodeType::IsNotNullExpr => 0.99,
            _ => 0.1,
        }
    }

    fn equality_selectivity(
        &self,
        condition: &QueryNode,
        table: Option<&str>,
        stats: &StatsMap,
    ) -> f64 {
        let column = condition.get_child(0).and_then(extract_column_name);
        let Some(column) = column else {
            return 0.1;
        };
        let stat = table
            .and_then(|t| stats.get(t))
            .or_else(|| stats.values().find(|s| s.v_a_r.contains_key(&column)));
        match stat {
            Some(stat) => {
                let distinct = stat.distinct(&column);
                if distinct > 0 {
                    1.0 / distinct as f64
                } else {
                    0.1
                }
            }
            None => 0.1,
        }
    }
}

fn scale_blocks(blocks: f64, factor: f64) -> f64 {
    (blocks * factor).ceil().max(1.0)
}

/// Resolves the base table beneath `ALIAS` wrappers, if the subtree is a
/// plain relation.
fn base_table(node: &QueryNode) -> Option<&str> {
    match node.node_type {
        NodeType::Relation => Some(node.value.as_str()),
        NodeType::Alias => node.get_child(0).and_then(base_table),
        _ => None,
    }
}

/// For `a.x = b.y` returns one side's column name.
fn equi_join_column(condition: &QueryNode) -> Option<String> {
    if condition.is_type(NodeType::Comparison) && condition.is_value("=") {
        let left = extract_column_name(condition.get_child(0)?);
        let right = extract_column_name(condition.get_child(1)?);
        if left.is_some() && right.is_some() {
            return right;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use briar_storage::IndexDescriptor;
    use briar_tree::refs::{column_ref, conjunction};

    fn stat(n_r: u64, distinct_id: u64) -> Statistic {
        let mut stat = Statistic::empty();
        stat.n_r = n_r;
        stat.f_r = 10;
        stat.b_r = n_r.div_ceil(10);
        stat.l_r = 24;
        stat.v_a_r.insert("id".to_string(), distinct_id);
        stat
    }

    fn users_stats() -> StatsMap {
        let mut stats = StatsMap::new();
        stats.insert("users".to_string(), stat(1000, 1000));
        stats
    }

    fn cmp(op: &str, column: &str, literal: &str) -> QueryNode {
        QueryNode::with_children(
            NodeType::Comparison,
            op,
            vec![
                column_ref(None, column),
                QueryNode::new(NodeType::LiteralNumber, literal),
            ],
        )
    }

    #[test]
    fn test_scan_cost() {
        let model = CostModel::new();
        let scan = QueryNode::new(NodeType::Relation, "users");
        let cost = model.estimate(&scan, &users_stats());
        assert_eq!(cost.rows, 1000.0);
        assert_eq!(cost.io_cost, 100.0);
        assert!(cost.cpu_cost > 0.0);
    }

    #[test]
    fn test_filter_is_pipelined_and_reduces_rows() {
        let model = CostModel::new();
        // No index on "score", so the filter pipelines over the scan.
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                cmp(">", "score", "50"),
            ],
        );
        let cost = model.estimate(&filter, &users_stats());
        assert_eq!(cost.io_cost, 100.0);
        assert!((cost.rows - 330.0).abs() < 1.0);
    }

    #[test]
    fn test_equality_uses_index() {
        let model = CostModel::new();
        let mut stats = users_stats();
        stats
            .get_mut("users")
            .unwrap()
            .indexes
            .insert("id".to_string(), IndexDescriptor::btree(2));
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                cmp("=", "id", "42"),
            ],
        );
        let cost = model.estimate(&filter, &stats);
        // (h+1) * 1.5 + 1 data block: far below the 100-block scan.
        assert!(cost.io_cost < 10.0);
        assert_eq!(cost.rows, 1.0);
    }

    #[test]
    fn test_and_selectivity_is_multiplicative() {
        let model = CostModel::new();
        let cond = conjunction(vec![cmp(">", "a", "1"), cmp(">", "b", "2")]);
        let s = model.selectivity(&cond, None, &StatsMap::new());
        assert!((s - 0.33 * 0.33).abs() < 1e-9);
    }

    #[test]
    fn test_or_selectivity_inclusion_exclusion() {
        let model = CostModel::new();
        let cond = QueryNode::with_children(
            NodeType::Operator,
            "OR",
            vec![cmp(">", "a", "1"), cmp(">", "b", "2")],
        );
        let s = model.selectivity(&cond, None, &StatsMap::new());
        assert!((s - (0.33 + 0.33 - 0.33 * 0.33)).abs() < 1e-9);
    }

    #[test]
    fn test_hash_join_cheaper_than_nested_loop_on_big_tables() {
        let model = CostModel::new();
        let mut stats = users_stats();
        stats.insert("profiles".to_string(), stat(1000, 1000));
        let condition = QueryNode::with_children(
            NodeType::Comparison,
            "=",
            vec![
                column_ref(Some("users"), "id"),
                column_ref(Some("profiles"), "user_id"),
            ],
        );
        let mut join = QueryNode::with_children(
            NodeType::Join,
            "INNER",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                QueryNode::new(NodeType::Relation, "profiles"),
                condition,
            ],
        );
        join.method = Some(JoinMethod::NestedLoop);
        let nl = model.estimate(&join, &stats);
        join.method = Some(JoinMethod::Hash);
        let hash = model.estimate(&join, &stats);
        assert!(hash.total() < nl.total());
    }

    #[test]
    fn test_cascaded_filter_does_not_increase_cardinality() {
        // Cost monotonicity: a filter above a selective subtree cannot
        // raise its estimated output cardinality.
        let model = CostModel::new();
        let stats = users_stats();
        let inner = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                cmp(">", "score", "50"),
            ],
        );
        let inner_rows = model.estimate(&inner, &stats).rows;
        let outer = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![inner, cmp("<", "score", "90")],
        );
        let outer_rows = model.estimate(&outer, &stats).rows;
        assert!(outer_rows <= inner_rows);
    }
}
