//! Table schemas and constraints.

use serde::{Deserialize, Serialize};

use briar_common::constants::is_valid_identifier;
use briar_common::{DbError, DbResult, Row, Value};

/// Column data types supported by the SQL surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Fixed-length character string.
    Char(usize),
    /// Variable-length character string.
    Varchar(usize),
}

impl ColumnType {
    /// Returns true if `value` is storable in a column of this type.
    ///
    /// Integers widen into float columns; NULL is storable everywhere.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Integer, Value::Int(_)) => true,
            (ColumnType::Float, Value::Int(_) | Value::Float(_)) => true,
            (ColumnType::Char(n) | ColumnType::Varchar(n), Value::Str(s)) => s.len() <= *n,
            _ => false,
        }
    }

    /// Returns the SQL name of this type.
    #[must_use]
    pub fn sql_name(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Char(n) => format!("CHAR({})", n),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
        }
    }

    /// Parses a SQL type name: `INTEGER | FLOAT | CHAR(n) | VARCHAR(n)`.
    #[must_use]
    pub fn parse(text: &str) -> Option<ColumnType> {
        let upper = text.trim().to_ascii_uppercase();
        match upper.as_str() {
            "INTEGER" | "INT" => return Some(ColumnType::Integer),
            "FLOAT" => return Some(ColumnType::Float),
            _ => {}
        }
        let sized = |prefix: &str| -> Option<usize> {
            upper
                .strip_prefix(prefix)?
                .strip_prefix('(')?
                .strip_suffix(')')?
                .trim()
                .parse()
                .ok()
        };
        if let Some(n) = sized("CHAR") {
            return Some(ColumnType::Char(n));
        }
        if let Some(n) = sized("VARCHAR") {
            return Some(ColumnType::Varchar(n));
        }
        None
    }

    /// Rough byte size of a value of this type, for statistics.
    #[must_use]
    pub fn size_hint(&self) -> usize {
        match self {
            ColumnType::Integer | ColumnType::Float => 8,
            ColumnType::Char(n) | ColumnType::Varchar(n) => *n,
        }
    }
}

/// One column of a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
    /// Whether this column is the primary key.
    pub primary_key: bool,
}

impl ColumnDef {
    /// Creates a plain column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
        }
    }

    /// Marks this column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A foreign key constraint: `column` references `ref_table(ref_column)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// The constrained column in this table.
    pub column: String,
    /// The referenced table.
    pub ref_table: String,
    /// The referenced column.
    pub ref_column: String,
}

/// A table schema: ordered columns plus constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    /// Creates a schema with no foreign keys.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a foreign key constraint.
    #[must_use]
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Returns the column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Looks up a column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the primary key column name, if one is declared.
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.as_str())
    }

    /// Validates the schema itself: at least one column, unique valid
    /// names, at most one primary key.
    pub fn validate(&self) -> DbResult<()> {
        if self.columns.is_empty() {
            return Err(DbError::SchemaInvalid {
                message: "a table needs at least one column".to_string(),
            });
        }
        let mut seen = Vec::new();
        let mut pk_count = 0;
        for column in &self.columns {
            if !is_valid_identifier(&column.name) {
                return Err(DbError::SchemaInvalid {
                    message: format!("invalid column name '{}'", column.name),
                });
            }
            if seen.contains(&column.name.as_str()) {
                return Err(DbError::SchemaInvalid {
                    message: format!("duplicate column '{}'", column.name),
                });
            }
            seen.push(column.name.as_str());
            if column.primary_key {
                pk_count += 1;
            }
        }
        if pk_count > 1 {
            return Err(DbError::SchemaInvalid {
                message: "at most one primary key column is allowed".to_string(),
            });
        }
        for fk in &self.foreign_keys {
            if self.column(&fk.column).is_none() {
                return Err(DbError::SchemaInvalid {
                    message: format!("foreign key on unknown column '{}'", fk.column),
                });
            }
        }
        Ok(())
    }

    /// Checks a row against this schema and returns it normalized to schema
    /// column order, with missing columns filled with NULL.
    ///
    /// Rejects columns outside the schema and values of the wrong type.
    pub fn check_row(&self, table: &str, row: &Row) -> DbResult<Row> {
        for name in row.column_names() {
            if self.column(name).is_none() {
                return Err(DbError::ColumnMissing {
                    column: name.to_string(),
                    table: table.to_string(),
                });
            }
        }
        let mut normalized = Row::new();
        for column in &self.columns {
            let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
            if !column.ty.accepts(&value) {
                return Err(DbError::TypeMismatch {
                    expected: column.ty.sql_name(),
                    actual: value.kind_name().to_string(),
                });
            }
            // Integers widen in place so float columns hold floats.
            let value = match (&column.ty, value) {
                (ColumnType::Float, Value::Int(i)) => Value::Float(i as f64),
                (_, v) => v,
            };
            normalized.set(column.name.clone(), value);
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("id", ColumnType::Integer).primary_key(),
            ColumnDef::new("score", ColumnType::Integer),
            ColumnDef::new("status", ColumnType::Varchar(16)),
        ])
    }

    #[test]
    fn test_type_parsing() {
        assert_eq!(ColumnType::parse("INTEGER"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::parse("varchar(30)"), Some(ColumnType::Varchar(30)));
        assert_eq!(ColumnType::parse("CHAR(4)"), Some(ColumnType::Char(4)));
        assert_eq!(ColumnType::parse("BLOB"), None);
    }

    #[test]
    fn test_schema_validation() {
        assert!(users_schema().validate().is_ok());

        let two_pks = Schema::new(vec![
            ColumnDef::new("a", ColumnType::Integer).primary_key(),
            ColumnDef::new("b", ColumnType::Integer).primary_key(),
        ]);
        assert!(two_pks.validate().is_err());

        let dup = Schema::new(vec![
            ColumnDef::new("a", ColumnType::Integer),
            ColumnDef::new("a", ColumnType::Float),
        ]);
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_check_row_normalizes_order() {
        let schema = users_schema();
        let row = Row::from_pairs([
            ("status".to_string(), Value::string("active")),
            ("id".to_string(), Value::Int(1)),
        ]);
        let normalized = schema.check_row("users", &row).unwrap();
        let names: Vec<_> = normalized.column_names().collect();
        assert_eq!(names, vec!["id", "score", "status"]);
        assert_eq!(normalized.get("score"), Some(&Value::Null));
    }

    #[test]
    fn test_check_row_rejects_unknown_column() {
        let schema = users_schema();
        let row = Row::from_pairs([("nope".to_string(), Value::Int(1))]);
        assert!(matches!(
            schema.check_row("users", &row),
            Err(DbError::ColumnMissing { .. })
        ));
    }

    #[test]
    fn test_check_row_rejects_bad_type() {
        let schema = users_schema();
        let row = Row::from_pairs([("id".to_string(), Value::string("one"))]);
        assert!(matches!(
            schema.check_row("users", &row),
            Err(DbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_varchar_length_enforced() {
        let schema = users_schema();
        let row = Row::from_pairs([(
            "status".to_string(),
            Value::string("definitely-longer-than-sixteen"),
        )]);
        assert!(schema.check_row("users", &row).is_err());
    }
}
