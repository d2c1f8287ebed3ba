//! Deterministic rewrite rules, applied once before the genetic search.
//!
//! Three rules run here and are never revisited by the search:
//!
//! 1. *Projection elimination*: `PROJECT(cols, PROJECT(_, X))` becomes
//!    `PROJECT(cols, X)` — the outer projection wins.
//! 2. *Filter pushdown over join*: AND-conjuncts that reference only one
//!    side of a join move below it; conjuncts referencing both sides stay
//!    above.
//! 3. *Projection pushdown over join*: each join input is narrowed to the
//!    columns the outer projection and the join condition actually need.

use std::collections::BTreeSet;

use briar_tree::refs::{
    collect_columns, collect_conjuncts, collect_tables, column_ref, condition_tables,
    conjunction,
};
use briar_tree::{NodeType, QueryNode};

use crate::cost::StatsMap;

/// Applies all deterministic rules.
#[must_use]
pub fn apply_deterministic(tree: QueryNode, stats: &StatsMap) -> QueryNode {
    let tree = push_filters_into_joins(tree, stats);
    let tree = push_projections_into_joins(tree, stats);
    eliminate_projections(tree)
}

/// `PROJECT(cols, PROJECT(_, X)) → PROJECT(cols, X)`, outer wins.
#[must_use]
pub fn eliminate_projections(mut node: QueryNode) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(eliminate_projections(child));
    }
    if node.is_type(NodeType::Project) {
        let source_idx = node.children.len() - 1;
        while node.children[source_idx].is_type(NodeType::Project) {
            let inner = node.children.remove(source_idx);
            let inner_source_idx = inner.children.len() - 1;
            let mut inner_children = inner.children;
            let source = inner_children.remove(inner_source_idx);
            node.children.insert(source_idx, source);
        }
    }
    node
}

/// Pushes filter conjuncts below joins where their table references allow.
#[must_use]
pub fn push_filters_into_joins(mut node: QueryNode, stats: &StatsMap) -> QueryNode {
    if node.is_type(NodeType::Filter)
        && node
            .get_child(0)
            .is_some_and(|source| source.is_type(NodeType::Join))
    {
        let condition = node.children.remove(1);
        let join = node.children.remove(0);
        let rewritten = distribute_filter(join, condition, stats);
        return push_children(rewritten, stats);
    }
    node = push_children(node, stats);
    node
}

fn push_children(mut node: QueryNode, stats: &StatsMap) -> QueryNode {
    for child in std::mem::take(&mut node.children) {
        node.children.push(push_filters_into_joins(child, stats));
    }
    node
}

/// Splits `condition` over `join`'s sides; returns the rewritten subtree.
fn distribute_filter(mut join: QueryNode, condition: QueryNode, stats: &StatsMap) -> QueryNode {
    let left_tables = collect_tables(&join.children[0]);
    let right_tables = collect_tables(&join.children[1]);

    let mut left_conds = Vec::new();
    let mut right_conds = Vec::new();
    let mut above_conds = Vec::new();

    for conjunct in collect_conjuncts(&condition) {
        let tables = resolve_condition_tables(conjunct, &left_tables, &right_tables, stats);
        let on_left = !tables.is_empty() && tables.is_subset(&left_tables);
        let on_right = !tables.is_empty() && tables.is_subset(&right_tables);
        let cloned = conjunct.clone_tree(true);
        if on_left {
            left_conds.push(cloned);
        } else if on_right {
            right_conds.push(cloned);
        } else {
            above_conds.push(cloned);
        }
    }

    if !left_conds.is_empty() {
        let left = join.children.remove(0);
        join.children.insert(
            0,
            QueryNode::with_children(NodeType::Filter, "", vec![left, conjunction(left_conds)]),
        );
    }
    if !right_conds.is_empty() {
        let right = join.children.remove(1);
        join.children.insert(
            1,
            QueryNode::with_children(
                NodeType::Filter,
                "",
                vec![right, conjunction(right_conds)],
            ),
        );
    }

    if above_conds.is_empty() {
        join
    } else {
        QueryNode::with_children(NodeType::Filter, "", vec![join, conjunction(above_conds)])
    }
}

/// Tables a conjunct references. Qualified refs answer directly;
/// unqualified columns resolve through the statistics catalog when exactly
/// one in-scope table owns the column.
fn resolve_condition_tables(
    conjunct: &QueryNode,
    left_tables: &BTreeSet<String>,
    right_tables: &BTreeSet<String>,
    stats: &StatsMap,
) -> BTreeSet<String> {
    let mut tables = condition_tables(conjunct);
    let in_scope: BTreeSet<&String> = left_tables.iter().chain(right_tables.iter()).collect();

    conjunct.visit_preorder(&mut |n| {
        if n.is_type(NodeType::ColumnRef)
            && !n.children.iter().any(|c| c.is_type(NodeType::TableName))
        {
            if let Some(column) = briar_tree::refs::extract_column_name(n) {
                let owners: Vec<&String> = in_scope
                    .iter()
                    .filter(|t| {
                        stats
                            .get(t.as_str())
                            .is_some_and(|s| s.v_a_r.contains_key(&column))
                    })
                    .copied()
                    .collect();
                match owners.as_slice() {
                    [only] => {
                        tables.insert((*only).clone());
                    }
                    _ => {
                        // Unknown or ambiguous: poison the set so the
                        // conjunct stays above the join.
                        tables.insert(String::new());
                    }
                }
            }
        }
    });
    tables
}

/// Narrows each inner-join input to the columns the projection above and
/// the join condition need.
#[must_use]
pub fn push_projections_into_joins(mut node: QueryNode, stats: &StatsMap) -> QueryNode {
    if node.is_type(NodeType::Project) && node.value != "*" {
        let projected = collect_columns(&node.children[0]);
        let source_idx = node.children.len() - 1;
        if node.children[source_idx].is_type(NodeType::Join)
            && node.children[source_idx].is_value("INNER")
        {
            let join = node.children.remove(source_idx);
            let narrowed = narrow_join_inputs(join, &projected, stats);
            node.children.insert(source_idx, narrowed);
        }
    }
    for child in std::mem::take(&mut node.children) {
        node.children.push(push_projections_into_joins(child, stats));
    }
    node
}

fn narrow_join_inputs(
    mut join: QueryNode,
    projected: &BTreeSet<String>,
    stats: &StatsMap,
) -> QueryNode {
    let Some(condition) = join.get_child(2) else {
        return join;
    };
    let join_columns = collect_columns(condition);

    for side in 0..2 {
        let input = &join.children[side];
        // Wrapping a bare projection in another would be undone anyway.
        if input.is_type(NodeType::Project) {
            continue;
        }
        let side_tables = collect_tables(input);
        let needed: Vec<String> = projected
            .iter()
            .chain(join_columns.iter())
            .filter(|column| {
                side_tables.iter().any(|table| {
                    stats
                        .get(table)
                        .is_some_and(|s| s.v_a_r.contains_key(*column))
                })
            })
            .cloned()
            .collect();
        if needed.is_empty() {
            continue;
        }
        let mut deduped = needed;
        deduped.sort();
        deduped.dedup();

        let column_list = QueryNode::with_children(
            NodeType::List,
            "",
            deduped.iter().map(|c| column_ref(None, c)).collect(),
        );
        let input = join.children.remove(side);
        join.children.insert(
            side,
            QueryNode::with_children(NodeType::Project, "", vec![column_list, input]),
        );
    }
    join
}

#[cfg(test)]
mod tests {
    use super::*;
    use briar_storage::Statistic;

    fn stats_for(tables: &[(&str, &[&str])]) -> StatsMap {
        let mut stats = StatsMap::new();
        for (table, columns) in tables {
            let mut stat = Statistic::empty();
            stat.n_r = 100;
            stat.b_r = 10;
            stat.f_r = 10;
            for column in *columns {
                stat.v_a_r.insert((*column).to_string(), 10);
            }
            stats.insert((*table).to_string(), stat);
        }
        stats
    }

    fn cmp(table: Option<&str>, column: &str, op: &str, literal: &str) -> QueryNode {
        QueryNode::with_children(
            NodeType::Comparison,
            op,
            vec![
                column_ref(table, column),
                QueryNode::new(NodeType::LiteralNumber, literal),
            ],
        )
    }

    fn join_users_profiles() -> QueryNode {
        QueryNode::with_children(
            NodeType::Join,
            "INNER",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                QueryNode::new(NodeType::Relation, "profiles"),
                QueryNode::with_children(
                    NodeType::Comparison,
                    "=",
                    vec![
                        column_ref(Some("users"), "id"),
                        column_ref(Some("profiles"), "user_id"),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_projection_elimination_outer_wins() {
        let inner = QueryNode::with_children(
            NodeType::Project,
            "",
            vec![
                QueryNode::with_children(NodeType::List, "", vec![column_ref(None, "a")]),
                QueryNode::new(NodeType::Relation, "t"),
            ],
        );
        let outer = QueryNode::with_children(
            NodeType::Project,
            "",
            vec![
                QueryNode::with_children(NodeType::List, "", vec![column_ref(None, "b")]),
                inner,
            ],
        );
        let result = eliminate_projections(outer);
        assert!(result.is_type(NodeType::Project));
        assert!(result.children[1].is_type(NodeType::Relation));
    }

    #[test]
    fn test_projection_elimination_is_idempotent() {
        let tree = QueryNode::with_children(
            NodeType::Project,
            "*",
            vec![QueryNode::with_children(
                NodeType::Project,
                "*",
                vec![QueryNode::new(NodeType::Relation, "t")],
            )],
        );
        let once = eliminate_projections(tree);
        let twice = eliminate_projections(once.clone_tree(true));
        assert_eq!(once.render(), twice.render());
    }

    #[test]
    fn test_filter_pushdown_one_sided_conjunct() {
        let stats = stats_for(&[("users", &["id", "age"]), ("profiles", &["user_id", "bio"])]);
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![join_users_profiles(), cmp(Some("users"), "age", ">", "99")],
        );
        let result = push_filters_into_joins(filter, &stats);
        // The filter moved below the join on the users side.
        assert!(result.is_type(NodeType::Join));
        assert!(result.children[0].is_type(NodeType::Filter));
        assert!(result.children[0].children[0].is_value("users"));
        assert!(result.children[1].is_type(NodeType::Relation));
    }

    #[test]
    fn test_filter_pushdown_splits_conjuncts() {
        let stats = stats_for(&[("users", &["id", "age"]), ("profiles", &["user_id", "bio"])]);
        let both_sides = QueryNode::with_children(
            NodeType::Comparison,
            "=",
            vec![
                column_ref(Some("users"), "id"),
                column_ref(Some("profiles"), "user_id"),
            ],
        );
        let condition = conjunction(vec![
            cmp(Some("users"), "age", ">", "30"),
            cmp(Some("profiles"), "bio", "!=", "0"),
            both_sides,
        ]);
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![join_users_profiles(), condition],
        );
        let result = push_filters_into_joins(filter, &stats);
        // Two conjuncts went down; the cross-table one stayed above.
        assert!(result.is_type(NodeType::Filter));
        let join = &result.children[0];
        assert!(join.is_type(NodeType::Join));
        assert!(join.children[0].is_type(NodeType::Filter));
        assert!(join.children[1].is_type(NodeType::Filter));
    }

    #[test]
    fn test_unqualified_column_resolves_through_stats() {
        let stats = stats_for(&[("users", &["id", "age"]), ("profiles", &["user_id", "bio"])]);
        // "age" is unqualified but only users owns it.
        let filter = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![join_users_profiles(), cmp(None, "age", ">", "99")],
        );
        let result = push_filters_into_joins(filter, &stats);
        assert!(result.is_type(NodeType::Join));
        assert!(result.children[0].is_type(NodeType::Filter));
    }

    #[test]
    fn test_projection_pushdown_narrows_inputs() {
        let stats = stats_for(&[("users", &["id", "age"]), ("profiles", &["user_id", "bio"])]);
        let tree = QueryNode::with_children(
            NodeType::Project,
            "",
            vec![
                QueryNode::with_children(
                    NodeType::List,
                    "",
                    vec![column_ref(None, "age"), column_ref(None, "bio")],
                ),
                join_users_profiles(),
            ],
        );
        let result = push_projections_into_joins(tree, &stats);
        let join = &result.children[1];
        assert!(join.children[0].is_type(NodeType::Project));
        assert!(join.children[1].is_type(NodeType::Project));
        // The users side needs its projected column plus the join key.
        let users_cols = collect_columns(&join.children[0].children[0]);
        assert!(users_cols.contains("age"));
        assert!(users_cols.contains("id"));
        assert!(!users_cols.contains("bio"));
    }
}
