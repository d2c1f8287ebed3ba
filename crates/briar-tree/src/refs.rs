//! Helpers for extracting table and column references from subtrees.
//!
//! The pushdown and associativity rules partition predicates by the tables
//! they mention; these helpers do that bookkeeping in one place.

use std::collections::BTreeSet;

use crate::node::{NodeType, QueryNode};

/// Collects every table name a relational subtree can produce rows for:
/// `RELATION` values, `ALIAS` values, and qualified `TABLE_NAME` identifiers.
#[must_use]
pub fn collect_tables(node: &QueryNode) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    node.visit_preorder(&mut |n| match n.node_type {
        NodeType::Relation | NodeType::Alias => {
            tables.insert(n.value.clone());
        }
        NodeType::TableName => {
            if let Some(ident) = n.get_child(0) {
                if ident.is_type(NodeType::Identifier) {
                    tables.insert(ident.value.clone());
                }
            }
        }
        _ => {}
    });
    tables
}

/// Collects the table names a condition references.
///
/// Qualified column refs contribute their table qualifier. Unqualified refs
/// contribute nothing; the caller decides what an unresolvable condition
/// means (pushdown keeps it above the join).
#[must_use]
pub fn condition_tables(condition: &QueryNode) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    condition.visit_preorder(&mut |n| {
        if n.is_type(NodeType::ColumnRef) {
            for child in &n.children {
                if child.is_type(NodeType::TableName) {
                    if let Some(ident) = child.get_child(0) {
                        tables.insert(ident.value.clone());
                    }
                }
            }
        }
    });
    tables
}

/// Extracts the bare column name from a `COLUMN_REF`, `COLUMN_NAME`, or
/// `IDENTIFIER` node.
#[must_use]
pub fn extract_column_name(node: &QueryNode) -> Option<String> {
    match node.node_type {
        NodeType::Identifier => Some(node.value.clone()),
        NodeType::ColumnName => node
            .get_child(0)
            .filter(|c| c.is_type(NodeType::Identifier))
            .map(|c| c.value.clone()),
        NodeType::ColumnRef => node
            .children
            .iter()
            .find(|c| c.is_type(NodeType::ColumnName))
            .and_then(extract_column_name),
        _ => None,
    }
}

/// Extracts the table qualifier from a `COLUMN_REF`, if present.
#[must_use]
pub fn extract_table_qualifier(node: &QueryNode) -> Option<String> {
    if !node.is_type(NodeType::ColumnRef) {
        return None;
    }
    node.children
        .iter()
        .find(|c| c.is_type(NodeType::TableName))
        .and_then(|t| t.get_child(0))
        .map(|ident| ident.value.clone())
}

/// Collects every column name mentioned anywhere in a subtree.
#[must_use]
pub fn collect_columns(node: &QueryNode) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    node.visit_preorder(&mut |n| {
        if n.is_type(NodeType::ColumnName) {
            if let Some(ident) = n.get_child(0) {
                columns.insert(ident.value.clone());
            }
        }
    });
    columns
}

/// Builds a `COLUMN_REF` node, optionally qualified by a table.
#[must_use]
pub fn column_ref(table: Option<&str>, column: &str) -> QueryNode {
    let mut node = QueryNode::leaf(NodeType::ColumnRef);
    if let Some(table) = table {
        node.add_child(QueryNode::with_children(
            NodeType::TableName,
            "",
            vec![QueryNode::new(NodeType::Identifier, table)],
        ));
    }
    node.add_child(QueryNode::with_children(
        NodeType::ColumnName,
        "",
        vec![QueryNode::new(NodeType::Identifier, column)],
    ));
    node
}

/// Splits a condition into its AND-conjuncts: an `OPERATOR("AND")` yields its
/// children, anything else yields itself.
#[must_use]
pub fn collect_conjuncts(condition: &QueryNode) -> Vec<&QueryNode> {
    if condition.is_type(NodeType::Operator) && condition.is_value("AND") {
        condition.children.iter().collect()
    } else {
        vec![condition]
    }
}

/// Rebuilds a condition from conjuncts: one conjunct stands alone, several
/// fold back under a fresh `OPERATOR("AND")`.
#[must_use]
pub fn conjunction(mut conjuncts: Vec<QueryNode>) -> QueryNode {
    if conjuncts.len() == 1 {
        conjuncts.remove(0)
    } else {
        QueryNode::with_children(NodeType::Operator, "AND", conjuncts)
    }
}
