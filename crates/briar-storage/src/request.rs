//! Read requests and filter conditions for the block API.

use std::fmt;

use serde::{Deserialize, Serialize};

use briar_common::{Row, Value};

/// Comparison operator in a storage-level condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=` / `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `LIKE` with leading/trailing `%` only.
    Like,
}

impl CompareOp {
    /// Parses an operator token.
    #[must_use]
    pub fn parse(text: &str) -> Option<CompareOp> {
        match text {
            "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            "LIKE" => Some(CompareOp::Like),
            _ => None,
        }
    }

    /// Evaluates `lhs op rhs` with numeric coercion.
    ///
    /// NULL operands make every comparison false; cross-kind comparisons are
    /// false, never errors.
    #[must_use]
    pub fn matches(&self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering;
        match self {
            CompareOp::Eq => lhs.eq_coerced(rhs),
            CompareOp::NotEq => {
                if lhs.is_null() || rhs.is_null() {
                    false
                } else {
                    !lhs.eq_coerced(rhs)
                }
            }
            CompareOp::Lt => lhs.cmp_coerced(rhs) == Some(Ordering::Less),
            CompareOp::LtEq => matches!(
                lhs.cmp_coerced(rhs),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => lhs.cmp_coerced(rhs) == Some(Ordering::Greater),
            CompareOp::GtEq => matches!(
                lhs.cmp_coerced(rhs),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Like => match rhs {
                Value::Str(pattern) => lhs.like(pattern),
                _ => false,
            },
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Like => "LIKE",
        };
        write!(f, "{}", text)
    }
}

/// One `(column, op, value)` condition. A condition list is an implicit AND.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// The filtered column.
    pub column: String,
    /// The comparison operator.
    pub op: CompareOp,
    /// The operand.
    pub value: Value,
}

impl Condition {
    /// Creates a condition.
    pub fn new(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Creates an equality condition.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, CompareOp::Eq, value)
    }

    /// Evaluates this condition against a row. A missing column yields
    /// false; the manager validates column names before evaluation.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(value) => self.op.matches(value, &self.value),
            None => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}

/// Parameters for [`crate::StorageManager::read_block`].
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// The table to read.
    pub table: String,
    /// Requested columns; `["*"]` or an empty list means all columns.
    pub columns: Vec<String>,
    /// Conditions combined with AND.
    pub conditions: Vec<Condition>,
}

impl ReadRequest {
    /// Creates a full-table request.
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            conditions: Vec::new(),
        }
    }

    /// Restricts the requested columns.
    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Returns true if every column is requested.
    #[must_use]
    pub fn wants_all_columns(&self) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == "*")
    }
}
