//! Arity validation for query trees.
//!
//! A total function from tree to `Ok` or a description of the first broken
//! invariant. The optimizer and executor trust trees that pass.

use crate::node::{NodeType, QueryNode};

/// Validates the arity invariants of every node in the tree.
///
/// # Errors
///
/// Returns a description of the first violated invariant, naming the node
/// type and its ID.
pub fn validate(node: &QueryNode) -> Result<(), String> {
    check_node(node)?;
    for child in &node.children {
        validate(child)?;
    }
    Ok(())
}

fn fail(node: &QueryNode, expected: &str) -> Result<(), String> {
    Err(format!(
        "{} node {} has {} children, expected {}",
        node.node_type,
        node.id,
        node.children.len(),
        expected
    ))
}

fn check_node(node: &QueryNode) -> Result<(), String> {
    let n = node.children.len();
    match node.node_type {
        t if t.is_atom() => {
            if n != 0 {
                return fail(node, "none (atoms are leaves)");
            }
        }
        NodeType::ColumnName | NodeType::TableName => {
            if n != 1 || !node.children[0].is_type(NodeType::Identifier) {
                return fail(node, "exactly one IDENTIFIER");
            }
        }
        NodeType::ColumnRef => {
            let shape_ok = match n {
                1 => node.children[0].is_type(NodeType::ColumnName),
                2 => {
                    node.children[0].is_type(NodeType::TableName)
                        && node.children[1].is_type(NodeType::ColumnName)
                }
                _ => false,
            };
            if !shape_ok {
                return fail(node, "[COLUMN_NAME] or [TABLE_NAME, COLUMN_NAME]");
            }
        }
        NodeType::Comparison => {
            if !matches!(node.value.as_str(), "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=") {
                return Err(format!(
                    "COMPARISON node {} has unknown operator '{}'",
                    node.id, node.value
                ));
            }
            if n != 2 {
                return fail(node, "exactly two (lhs, rhs)");
            }
        }
        NodeType::ArithExpr => {
            if !matches!(node.value.as_str(), "+" | "-" | "*" | "/") {
                return Err(format!(
                    "ARITH_EXPR node {} has unknown operator '{}'",
                    node.id, node.value
                ));
            }
            if n != 2 {
                return fail(node, "exactly two (lhs, rhs)");
            }
        }
        NodeType::InExpr | NodeType::NotInExpr => {
            if n != 2 || !node.children[1].is_type(NodeType::List) {
                return fail(node, "exactly two (expr, LIST)");
            }
        }
        NodeType::ExistsExpr | NodeType::NotExistsExpr => {
            if n != 1 {
                return fail(node, "exactly one (subquery)");
            }
        }
        NodeType::BetweenExpr => {
            if n != 3 {
                return fail(node, "exactly three (expr, low, high)");
            }
        }
        NodeType::IsNullExpr | NodeType::IsNotNullExpr => {
            if n != 1 {
                return fail(node, "exactly one (expr)");
            }
        }
        NodeType::LikeExpr => {
            if n != 2 || !node.children[1].is_type(NodeType::LiteralString) {
                return fail(node, "exactly two (expr, pattern literal)");
            }
        }
        NodeType::Operator => match node.value.as_str() {
            "NOT" => {
                if n != 1 {
                    return fail(node, "exactly one for NOT");
                }
            }
            "AND" | "OR" => {
                if n < 2 {
                    return fail(node, "at least two for AND/OR");
                }
            }
            other => {
                return Err(format!(
                    "OPERATOR node {} has unknown connective '{}'",
                    node.id, other
                ));
            }
        },
        NodeType::Project => {
            if node.value == "*" {
                if n != 1 {
                    return fail(node, "exactly one (source) for PROJECT(*)");
                }
            } else if n != 2 || !node.children[0].is_type(NodeType::List) {
                return fail(node, "exactly two (column LIST, source)");
            }
        }
        NodeType::Filter => {
            if n != 2 {
                return fail(node, "exactly two (source, condition)");
            }
        }
        NodeType::Sort => {
            if n != 2 || !node.children[1].is_type(NodeType::OrderItem) {
                return fail(node, "exactly two (source, ORDER_ITEM)");
            }
        }
        NodeType::OrderItem => {
            if !matches!(node.value.as_str(), "ASC" | "DESC") {
                return Err(format!(
                    "ORDER_ITEM node {} has unknown direction '{}'",
                    node.id, node.value
                ));
            }
            if n != 1 {
                return fail(node, "exactly one (column)");
            }
        }
        NodeType::Limit => {
            if node.value.parse::<u64>().is_err() {
                return Err(format!(
                    "LIMIT node {} has non-numeric count '{}'",
                    node.id, node.value
                ));
            }
            if n != 1 {
                return fail(node, "exactly one (source)");
            }
        }
        NodeType::Join => match node.value.as_str() {
            "NATURAL" | "CROSS" => {
                if n != 2 {
                    return fail(node, "exactly two relations");
                }
            }
            "INNER" => {
                if n != 3 {
                    return fail(node, "two relations and a condition");
                }
            }
            other => {
                return Err(format!(
                    "JOIN node {} has unknown join type '{}'",
                    node.id, other
                ));
            }
        },
        NodeType::Relation => {
            if n != 0 {
                return fail(node, "none (RELATION is a leaf)");
            }
            if node.value.is_empty() {
                return Err(format!("RELATION node {} has no table name", node.id));
            }
        }
        NodeType::Alias => {
            if n != 1 {
                return fail(node, "exactly one (source)");
            }
        }
        NodeType::List => {}
        NodeType::UpdateQuery => {
            let shape_ok = (n == 1 || n == 2) && node.children[0].is_type(NodeType::List);
            if !shape_ok {
                return fail(node, "(assignment LIST, optional condition)");
            }
        }
        NodeType::InsertQuery => {
            let shape_ok = n == 2
                && node.children[0].is_type(NodeType::List)
                && node.children[1].is_type(NodeType::List);
            if !shape_ok {
                return fail(node, "(column LIST, value LIST)");
            }
        }
        NodeType::DeleteQuery => {
            if n > 1 {
                return fail(node, "at most one (condition)");
            }
        }
        NodeType::Assignment => {
            if n != 1 {
                return fail(node, "exactly one (expr)");
            }
        }
        NodeType::BeginTransaction => {}
        NodeType::Commit => {
            if n != 0 {
                return fail(node, "none");
            }
        }
        NodeType::CreateTable => {
            if n != 1 || !node.children[0].is_type(NodeType::List) {
                return fail(node, "exactly one (COLUMN_DEF LIST)");
            }
        }
        NodeType::DropTable => {
            if n > 1 {
                return fail(node, "at most one (behavior)");
            }
        }
        NodeType::ColumnDef => {
            if n == 0 {
                return fail(node, "at least one (type)");
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::column_ref;

    fn comparison() -> QueryNode {
        QueryNode::with_children(
            NodeType::Comparison,
            "=",
            vec![
                column_ref(None, "id"),
                QueryNode::new(NodeType::LiteralNumber, "1"),
            ],
        )
    }

    #[test]
    fn test_valid_filter() {
        let tree = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![QueryNode::new(NodeType::Relation, "users"), comparison()],
        );
        assert!(validate(&tree).is_ok());
    }

    #[test]
    fn test_filter_arity_enforced() {
        let tree = QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![QueryNode::new(NodeType::Relation, "users")],
        );
        let err = validate(&tree).unwrap_err();
        assert!(err.contains("FILTER"));
    }

    #[test]
    fn test_star_project_has_single_child() {
        let good = QueryNode::with_children(
            NodeType::Project,
            "*",
            vec![QueryNode::new(NodeType::Relation, "users")],
        );
        assert!(validate(&good).is_ok());

        let bad = QueryNode::with_children(
            NodeType::Project,
            "*",
            vec![
                QueryNode::new(NodeType::Relation, "users"),
                QueryNode::new(NodeType::Relation, "extra"),
            ],
        );
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn test_not_is_unary() {
        let good =
            QueryNode::with_children(NodeType::Operator, "NOT", vec![comparison()]);
        assert!(validate(&good).is_ok());

        let bad = QueryNode::with_children(
            NodeType::Operator,
            "NOT",
            vec![comparison(), comparison()],
        );
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn test_and_needs_two_conjuncts() {
        let bad = QueryNode::with_children(NodeType::Operator, "AND", vec![comparison()]);
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn test_inner_join_needs_condition() {
        let bad = QueryNode::with_children(
            NodeType::Join,
            "INNER",
            vec![
                QueryNode::new(NodeType::Relation, "a"),
                QueryNode::new(NodeType::Relation, "b"),
            ],
        );
        assert!(validate(&bad).is_err());

        let good = QueryNode::with_children(
            NodeType::Join,
            "NATURAL",
            vec![
                QueryNode::new(NodeType::Relation, "a"),
                QueryNode::new(NodeType::Relation, "b"),
            ],
        );
        assert!(validate(&good).is_ok());
    }

    #[test]
    fn test_atoms_are_leaves() {
        let bad = QueryNode::with_children(
            NodeType::LiteralNumber,
            "1",
            vec![QueryNode::new(NodeType::Identifier, "x")],
        );
        assert!(validate(&bad).is_err());
    }
}
