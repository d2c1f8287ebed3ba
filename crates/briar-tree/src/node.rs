//! Query tree nodes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Global node ID counter. IDs are process-unique; rewrites that clone a
/// subtree choose explicitly whether to preserve the original IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a tree node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocates a fresh, process-unique node ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of a query tree node.
///
/// Types partition into atoms, references, expressions, logic, relational
/// operators, DML, transactional markers, and DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    // Atoms
    /// A bare identifier.
    Identifier,
    /// A numeric literal (integer or float, kept as text in `value`).
    LiteralNumber,
    /// A string literal.
    LiteralString,
    /// A boolean literal (`true` / `false`).
    LiteralBoolean,
    /// The NULL literal.
    LiteralNull,

    // References
    /// A column name wrapping an `Identifier`.
    ColumnName,
    /// A table name wrapping an `Identifier`.
    TableName,
    /// A column reference: `[ColumnName]` or `[TableName, ColumnName]`.
    ColumnRef,

    // Expressions
    /// Binary comparison; `value` is one of `= != <> < <= > >=`.
    Comparison,
    /// Binary arithmetic; `value` is one of `+ - * /`.
    ArithExpr,
    /// `expr IN (list)`.
    InExpr,
    /// `expr NOT IN (list)`.
    NotInExpr,
    /// `EXISTS (subquery)`.
    ExistsExpr,
    /// `NOT EXISTS (subquery)`.
    NotExistsExpr,
    /// `expr BETWEEN low AND high`.
    BetweenExpr,
    /// `expr IS NULL`.
    IsNullExpr,
    /// `expr IS NOT NULL`.
    IsNotNullExpr,
    /// `expr LIKE 'pattern'`.
    LikeExpr,

    // Logic
    /// Logical connective; `value` is `AND`, `OR`, or `NOT`.
    Operator,

    // Relational
    /// Projection; `value` is `*` (one child: source) or empty
    /// (children: column list, source).
    Project,
    /// Selection; children are `[source, condition]`.
    Filter,
    /// Ordering; children are `[source, order item]`.
    Sort,
    /// One ORDER BY item; `value` is `ASC` or `DESC`, child is the column.
    OrderItem,
    /// Row limit; `value` is the count, one child: source.
    Limit,
    /// Join; `value` is `INNER`, `NATURAL`, or `CROSS`.
    Join,
    /// A base table; `value` is the table name.
    Relation,
    /// A table alias; `value` is the alias, one child: source.
    Alias,
    /// An ordered list of child nodes.
    List,

    // DML
    /// `UPDATE`; `value` is the table, children are
    /// `[assignment list, condition?]`.
    UpdateQuery,
    /// `INSERT`; `value` is the table, children are
    /// `[column list, value list]`.
    InsertQuery,
    /// `DELETE`; `value` is the table, children are `[condition?]`.
    DeleteQuery,
    /// One `SET col = expr` item; `value` is the column, child the expr.
    Assignment,

    // Transactional
    /// `BEGIN TRANSACTION`; children may hold a batched statement list.
    BeginTransaction,
    /// `COMMIT`.
    Commit,

    // DDL
    /// `CREATE TABLE`; `value` is the table, child is the column-def list.
    CreateTable,
    /// `DROP TABLE`; `value` is the table, optional child holds
    /// `CASCADE` / `RESTRICT`.
    DropTable,
    /// One column definition; `value` is the column name.
    ColumnDef,
}

impl NodeType {
    /// Returns true for atom node types, which must be leaves.
    #[must_use]
    pub const fn is_atom(self) -> bool {
        matches!(
            self,
            NodeType::Identifier
                | NodeType::LiteralNumber
                | NodeType::LiteralString
                | NodeType::LiteralBoolean
                | NodeType::LiteralNull
        )
    }

    /// Returns true for literal node types.
    #[must_use]
    pub const fn is_literal(self) -> bool {
        matches!(
            self,
            NodeType::LiteralNumber
                | NodeType::LiteralString
                | NodeType::LiteralBoolean
                | NodeType::LiteralNull
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Identifier => "IDENTIFIER",
            NodeType::LiteralNumber => "LITERAL_NUMBER",
            NodeType::LiteralString => "LITERAL_STRING",
            NodeType::LiteralBoolean => "LITERAL_BOOLEAN",
            NodeType::LiteralNull => "LITERAL_NULL",
            NodeType::ColumnName => "COLUMN_NAME",
            NodeType::TableName => "TABLE_NAME",
            NodeType::ColumnRef => "COLUMN_REF",
            NodeType::Comparison => "COMPARISON",
            NodeType::ArithExpr => "ARITH_EXPR",
            NodeType::InExpr => "IN_EXPR",
            NodeType::NotInExpr => "NOT_IN_EXPR",
            NodeType::ExistsExpr => "EXISTS_EXPR",
            NodeType::NotExistsExpr => "NOT_EXISTS_EXPR",
            NodeType::BetweenExpr => "BETWEEN_EXPR",
            NodeType::IsNullExpr => "IS_NULL_EXPR",
            NodeType::IsNotNullExpr => "IS_NOT_NULL_EXPR",
            NodeType::LikeExpr => "LIKE_EXPR",
            NodeType::Operator => "OPERATOR",
            NodeType::Project => "PROJECT",
            NodeType::Filter => "FILTER",
            NodeType::Sort => "SORT",
            NodeType::OrderItem => "ORDER_ITEM",
            NodeType::Limit => "LIMIT",
            NodeType::Join => "JOIN",
            NodeType::Relation => "RELATION",
            NodeType::Alias => "ALIAS",
            NodeType::List => "LIST",
            NodeType::UpdateQuery => "UPDATE_QUERY",
            NodeType::InsertQuery => "INSERT_QUERY",
            NodeType::DeleteQuery => "DELETE_QUERY",
            NodeType::Assignment => "ASSIGNMENT",
            NodeType::BeginTransaction => "BEGIN_TRANSACTION",
            NodeType::Commit => "COMMIT",
            NodeType::CreateTable => "CREATE_TABLE",
            NodeType::DropTable => "DROP_TABLE",
            NodeType::ColumnDef => "COLUMN_DEF",
        };
        write!(f, "{}", name)
    }
}

/// Physical join strategy, chosen by the optimizer per join node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinMethod {
    /// Block nested-loop join.
    NestedLoop,
    /// In-memory hash join on the equi-join column.
    Hash,
    /// Index nested-loop join; valid only when the inner side's join column
    /// is indexed.
    IndexNestedLoop,
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinMethod::NestedLoop => write!(f, "nested_loop"),
            JoinMethod::Hash => write!(f, "hash"),
            JoinMethod::IndexNestedLoop => write!(f, "index_nested_loop"),
        }
    }
}

/// A node in the query tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryNode {
    /// The node type.
    pub node_type: NodeType,
    /// The node value; meaning depends on the type (operator text, table
    /// name, literal text, ...).
    pub value: String,
    /// Ordered children.
    pub children: Vec<QueryNode>,
    /// Stable ID, assigned at construction.
    pub id: NodeId,
    /// Physical method annotation; joins default to nested loop.
    pub method: Option<JoinMethod>,
}

impl QueryNode {
    /// Creates a node with a value and no children.
    pub fn new(node_type: NodeType, value: impl Into<String>) -> Self {
        let method = match node_type {
            NodeType::Join => Some(JoinMethod::NestedLoop),
            _ => None,
        };
        Self {
            node_type,
            value: value.into(),
            children: Vec::new(),
            id: NodeId::next(),
            method,
        }
    }

    /// Creates a node with no value and no children.
    pub fn leaf(node_type: NodeType) -> Self {
        Self::new(node_type, "")
    }

    /// Creates a node with children.
    pub fn with_children(
        node_type: NodeType,
        value: impl Into<String>,
        children: Vec<QueryNode>,
    ) -> Self {
        let mut node = Self::new(node_type, value);
        node.children = children;
        node
    }

    /// Appends a child, returning `self` for chaining.
    #[must_use]
    pub fn child(mut self, child: QueryNode) -> Self {
        self.children.push(child);
        self
    }

    /// Appends a child in place.
    pub fn add_child(&mut self, child: QueryNode) {
        self.children.push(child);
    }

    /// Returns the child at `index`, if any.
    pub fn get_child(&self, index: usize) -> Option<&QueryNode> {
        self.children.get(index)
    }

    /// Returns true if the node has the given type.
    pub fn is_type(&self, node_type: NodeType) -> bool {
        self.node_type == node_type
    }

    /// Returns true if the node value matches.
    pub fn is_value(&self, value: &str) -> bool {
        self.value == value
    }

    /// Deep clone.
    ///
    /// With `preserve_ids` the clone keeps every node's original ID so
    /// optimizer parameter maps keyed by ID stay valid; without it, every
    /// node gets a fresh ID and the caller must rebuild those maps.
    #[must_use]
    pub fn clone_tree(&self, preserve_ids: bool) -> QueryNode {
        QueryNode {
            node_type: self.node_type,
            value: self.value.clone(),
            children: self
                .children
                .iter()
                .map(|c| c.clone_tree(preserve_ids))
                .collect(),
            id: if preserve_ids { self.id } else { NodeId::next() },
            method: self.method,
        }
    }

    /// Pre-order traversal (parent before children).
    pub fn visit_preorder<'a>(&'a self, visitor: &mut dyn FnMut(&'a QueryNode)) {
        visitor(self);
        for child in &self.children {
            child.visit_preorder(visitor);
        }
    }

    /// Post-order traversal (children before parent).
    pub fn visit_postorder<'a>(&'a self, visitor: &mut dyn FnMut(&'a QueryNode)) {
        for child in &self.children {
            child.visit_postorder(visitor);
        }
        visitor(self);
    }

    /// Collects all nodes satisfying `predicate`, in pre-order.
    pub fn find_nodes(&self, predicate: &dyn Fn(&QueryNode) -> bool) -> Vec<&QueryNode> {
        let mut found = Vec::new();
        self.visit_preorder(&mut |node| {
            if predicate(node) {
                found.push(node);
            }
        });
        found
    }

    /// Collects all nodes of the given type, in pre-order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<&QueryNode> {
        self.find_nodes(&|node| node.node_type == node_type)
    }

    /// Finds a node by ID.
    pub fn find_by_id(&self, id: NodeId) -> Option<&QueryNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    /// Finds a node by ID, mutably.
    pub fn find_by_id_mut(&mut self, id: NodeId) -> Option<&mut QueryNode> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// Replaces the subtree rooted at `id` with `replacement`.
    ///
    /// Returns true if a node with that ID was found. Replacing the root
    /// itself is the caller's job.
    pub fn replace_subtree(&mut self, id: NodeId, replacement: QueryNode) -> bool {
        for child in &mut self.children {
            if child.id == id {
                *child = replacement;
                return true;
            }
            if child.replace_subtree(id, replacement.clone_tree(true)) {
                return true;
            }
        }
        false
    }

    /// Renders the tree for logs and test failure output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, "", true);
        out
    }

    fn render_into(&self, out: &mut String, prefix: &str, is_last: bool) {
        out.push_str(prefix);
        if !prefix.is_empty() {
            out.push_str(if is_last { "└── " } else { "├── " });
        }
        out.push_str(&self.node_type.to_string());
        if !self.value.is_empty() {
            out.push_str(&format!("(\"{}\")", self.value));
        }
        if let Some(method) = self.method {
            out.push_str(&format!(" [{}]", method));
        }
        out.push('\n');
        let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        let last = self.children.len().saturating_sub(1);
        for (i, child) in self.children.iter().enumerate() {
            child.render_into(out, &child_prefix, i == last);
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(\"{}\")", self.node_type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_tree() -> QueryNode {
        // FILTER(RELATION("users"), COMPARISON("=", col(id), 1))
        let cond = QueryNode::with_children(
            NodeType::Comparison,
            "=",
            vec![
                QueryNode::with_children(
                    NodeType::ColumnRef,
                    "",
                    vec![QueryNode::with_children(
                        NodeType::ColumnName,
                        "",
                        vec![QueryNode::new(NodeType::Identifier, "id")],
                    )],
                ),
                QueryNode::new(NodeType::LiteralNumber, "1"),
            ],
        );
        QueryNode::with_children(
            NodeType::Filter,
            "",
            vec![QueryNode::new(NodeType::Relation, "users"), cond],
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let tree = filter_tree();
        let mut ids = Vec::new();
        tree.visit_preorder(&mut |node| ids.push(node.id));
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len());
    }

    #[test]
    fn test_clone_preserves_or_refreshes_ids() {
        let tree = filter_tree();
        let preserved = tree.clone_tree(true);
        assert_eq!(tree.id, preserved.id);
        assert_eq!(tree.children[0].id, preserved.children[0].id);

        let fresh = tree.clone_tree(false);
        assert_ne!(tree.id, fresh.id);
        assert_ne!(tree.children[0].id, fresh.children[0].id);
    }

    #[test]
    fn test_find_by_id_and_replace() {
        let mut tree = filter_tree();
        let relation_id = tree.children[0].id;
        assert_eq!(
            tree.find_by_id(relation_id).map(|n| n.value.as_str()),
            Some("users")
        );

        let replacement = QueryNode::new(NodeType::Relation, "accounts");
        assert!(tree.replace_subtree(relation_id, replacement));
        assert_eq!(tree.children[0].value, "accounts");
    }

    #[test]
    fn test_traversal_order() {
        let tree = filter_tree();
        let mut pre = Vec::new();
        tree.visit_preorder(&mut |n| pre.push(n.node_type));
        assert_eq!(pre[0], NodeType::Filter);
        assert_eq!(pre[1], NodeType::Relation);

        let mut post = Vec::new();
        tree.visit_postorder(&mut |n| post.push(n.node_type));
        assert_eq!(*post.last().unwrap(), NodeType::Filter);
    }

    #[test]
    fn test_join_defaults_to_nested_loop() {
        let join = QueryNode::new(NodeType::Join, "INNER");
        assert_eq!(join.method, Some(JoinMethod::NestedLoop));
        let relation = QueryNode::new(NodeType::Relation, "users");
        assert_eq!(relation.method, None);
    }
}
