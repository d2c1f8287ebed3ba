//! The storage manager: table CRUD behind the narrow block API.
//!
//! One file per table (a JSON row per line) plus one schema descriptor per
//! database directory. Tables load into memory at open; every mutation
//! writes the table file back, so the on-disk state tracks the in-memory
//! state statement by statement.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use briar_common::constants::{is_valid_identifier, BLOCK_SIZE, SCHEMA_FILE};
use briar_common::{DbError, DbResult, Row, Value};

use crate::index::TableIndex;
use crate::request::{CompareOp, Condition, ReadRequest};
use crate::schema::{ColumnType, Schema};
use crate::stats::{IndexDescriptor, IndexKind, Statistic};

/// Write mode for [`StorageManager::write_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Append rows to the table.
    Append,
    /// Replace the whole table contents.
    Replace,
}

/// Behavior of [`StorageManager::drop_table`] when other tables reference
/// the dropped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropBehavior {
    /// Drop the table and remove foreign key constraints pointing at it.
    Cascade,
    /// Refuse to drop a referenced table.
    Restrict,
}

/// In-memory state of one table.
struct TableState {
    schema: Schema,
    rows: Vec<Row>,
    indexes: HashMap<String, TableIndex>,
}

impl TableState {
    fn new(schema: Schema) -> Self {
        let mut state = Self {
            schema,
            rows: Vec::new(),
            indexes: HashMap::new(),
        };
        // The primary key column gets a B-tree index from the start.
        if let Some(pk) = state.schema.primary_key().map(str::to_string) {
            state
                .indexes
                .insert(pk.clone(), TableIndex::build(IndexKind::BTree, &pk, &[]));
        }
        state
    }

    fn rebuild_indexes(&mut self) {
        let columns: Vec<(String, IndexKind)> = self
            .indexes
            .iter()
            .map(|(column, index)| (column.clone(), index.kind()))
            .collect();
        for (column, kind) in columns {
            self.indexes
                .insert(column.clone(), TableIndex::build(kind, &column, &self.rows));
        }
    }
}

/// Row-level tabular storage with a schema catalog.
pub struct StorageManager {
    data_dir: PathBuf,
    tables: RwLock<HashMap<String, TableState>>,
}

impl StorageManager {
    /// Opens (or creates) the database directory and loads every table.
    pub fn open(data_dir: impl Into<PathBuf>) -> DbResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let mut tables = HashMap::new();
        let schema_path = data_dir.join(SCHEMA_FILE);
        if schema_path.exists() {
            let text = fs::read_to_string(&schema_path)?;
            let schemas: HashMap<String, Schema> =
                serde_json::from_str(&text).map_err(|e| DbError::Internal {
                    message: format!("corrupt schema descriptor: {}", e),
                })?;
            for (name, schema) in schemas {
                let mut state = TableState::new(schema);
                state.rows = load_rows(&table_path(&data_dir, &name))?;
                state.rebuild_indexes();
                tables.insert(name, state);
            }
        }

        info!(dir = %data_dir.display(), tables = tables.len(), "storage opened");
        Ok(Self {
            data_dir,
            tables: RwLock::new(tables),
        })
    }

    /// Creates a table.
    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<()> {
        if !is_valid_identifier(name) {
            return Err(DbError::SchemaInvalid {
                message: format!("invalid table name '{}'", name),
            });
        }
        schema.validate()?;

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(DbError::TableExists {
                table: name.to_string(),
            });
        }
        for fk in &schema.foreign_keys {
            let referenced = tables.get(&fk.ref_table).ok_or_else(|| DbError::SchemaInvalid {
                message: format!(
                    "foreign key references unknown table '{}'",
                    fk.ref_table
                ),
            })?;
            if referenced.schema.column(&fk.ref_column).is_none() {
                return Err(DbError::SchemaInvalid {
                    message: format!(
                        "foreign key references unknown column '{}.{}'",
                        fk.ref_table, fk.ref_column
                    ),
                });
            }
        }

        tables.insert(name.to_string(), TableState::new(schema));
        self.save_schemas(&tables)?;
        save_rows(&table_path(&self.data_dir, name), &[])?;
        info!(table = name, "table created");
        Ok(())
    }

    /// Drops a table.
    pub fn drop_table(&self, name: &str, behavior: DropBehavior) -> DbResult<()> {
        let mut tables = self.tables.write();
        if !tables.contains_key(name) {
            return Err(DbError::TableMissing {
                table: name.to_string(),
            });
        }

        let referencing: Vec<String> = tables
            .iter()
            .filter(|(other, state)| {
                *other != name && state.schema.foreign_keys.iter().any(|fk| fk.ref_table == name)
            })
            .map(|(other, _)| other.clone())
            .collect();

        match behavior {
            DropBehavior::Restrict if !referencing.is_empty() => {
                return Err(DbError::FkViolation {
                    table: name.to_string(),
                    message: format!("referenced by {}", referencing.join(", ")),
                });
            }
            DropBehavior::Cascade => {
                for other in &referencing {
                    if let Some(state) = tables.get_mut(other) {
                        state.schema.foreign_keys.retain(|fk| fk.ref_table != name);
                    }
                }
            }
            DropBehavior::Restrict => {}
        }

        tables.remove(name);
        self.save_schemas(&tables)?;
        let path = table_path(&self.data_dir, name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        info!(table = name, "table dropped");
        Ok(())
    }

    /// Reads rows matching the request, projected to the requested columns.
    ///
    /// An empty result is not an error.
    pub fn read_block(&self, request: &ReadRequest) -> DbResult<Vec<Row>> {
        let tables = self.tables.read();
        let state = lookup(&tables, &request.table)?;

        if !request.wants_all_columns() {
            for column in &request.columns {
                if state.schema.column(column).is_none() {
                    return Err(DbError::ColumnMissing {
                        column: column.clone(),
                        table: request.table.clone(),
                    });
                }
            }
        }
        for condition in &request.conditions {
            check_condition(&state.schema, &request.table, condition)?;
        }

        let candidates = candidate_positions(state, &request.conditions);
        let mut result = Vec::new();
        for pos in candidates {
            let row = &state.rows[pos];
            if request.conditions.iter().all(|c| c.matches(row)) {
                result.push(if request.wants_all_columns() {
                    row.clone()
                } else {
                    row.project(&request.columns)
                });
            }
        }
        debug!(table = %request.table, rows = result.len(), "read_block");
        Ok(result)
    }

    /// Writes rows into a table; returns the number written.
    pub fn write_block(&self, table: &str, rows: &[Row], mode: WriteMode) -> DbResult<usize> {
        let mut tables = self.tables.write();

        // Normalize and run constraint checks before mutating anything.
        let normalized: Vec<Row> = {
            let state = lookup(&tables, table)?;
            let mut normalized = Vec::with_capacity(rows.len());
            for row in rows {
                normalized.push(state.schema.check_row(table, row)?);
            }
            let existing: &[Row] = match mode {
                WriteMode::Append => &state.rows,
                WriteMode::Replace => &[],
            };
            check_primary_key(&state.schema, table, existing, &normalized)?;
            check_foreign_keys(&tables, table, &normalized)?;
            normalized
        };

        let state = tables.get_mut(table).expect("checked above");
        if mode == WriteMode::Replace {
            state.rows.clear();
        }
        let written = normalized.len();
        state.rows.extend(normalized);
        state.rebuild_indexes();
        save_rows(&table_path(&self.data_dir, table), &state.rows)?;
        debug!(table, written, ?mode, "write_block");
        Ok(written)
    }

    /// Applies batched updates keyed on full old-row match; returns the
    /// number of rows updated. A pair whose old row no longer exists is
    /// skipped, not an error.
    pub fn update_by_old_new(&self, table: &str, pairs: &[(Row, Row)]) -> DbResult<usize> {
        let mut tables = self.tables.write();

        let planned: Vec<(usize, Row)> = {
            let state = lookup(&tables, table)?;
            let mut planned = Vec::new();
            let mut taken = vec![false; state.rows.len()];
            for (old, new) in pairs {
                let position = state.rows.iter().enumerate().find(|(pos, row)| {
                    !taken[*pos] && row.same_identity(old)
                });
                let Some((pos, _)) = position else {
                    continue;
                };
                taken[pos] = true;
                planned.push((pos, state.schema.check_row(table, new)?));
            }
            let replacements: Vec<Row> = planned.iter().map(|(_, row)| row.clone()).collect();
            check_foreign_keys(&tables, table, &replacements)?;
            planned
        };

        let state = tables.get_mut(table).expect("checked above");
        let updated = planned.len();
        for (pos, new_row) in planned {
            state.rows[pos] = new_row;
        }
        if updated > 0 {
            state.rebuild_indexes();
            save_rows(&table_path(&self.data_dir, table), &state.rows)?;
        }
        debug!(table, updated, "update_by_old_new");
        Ok(updated)
    }

    /// Deletes rows matching all conditions; returns the number deleted.
    pub fn delete_block(&self, table: &str, conditions: &[Condition]) -> DbResult<usize> {
        let mut tables = self.tables.write();
        {
            let state = lookup(&tables, table)?;
            for condition in conditions {
                check_condition(&state.schema, table, condition)?;
            }
        }
        let state = tables.get_mut(table).expect("checked above");
        let before = state.rows.len();
        state
            .rows
            .retain(|row| !conditions.iter().all(|c| c.matches(row)));
        let deleted = before - state.rows.len();
        if deleted > 0 {
            state.rebuild_indexes();
            save_rows(&table_path(&self.data_dir, table), &state.rows)?;
        }
        debug!(table, deleted, "delete_block");
        Ok(deleted)
    }

    /// Deletes the first row exactly matching `row`. A missing row is a
    /// no-op, which keeps undo replay idempotent.
    pub fn delete_exact(&self, table: &str, row: &Row) -> DbResult<usize> {
        let mut tables = self.tables.write();
        let state = match tables.get_mut(table) {
            Some(state) => state,
            None => {
                return Err(DbError::TableMissing {
                    table: table.to_string(),
                })
            }
        };
        let position = state.rows.iter().position(|r| r.same_identity(row));
        match position {
            Some(pos) => {
                state.rows.remove(pos);
                state.rebuild_indexes();
                save_rows(&table_path(&self.data_dir, table), &state.rows)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Inserts `row` unless an identical row is already present. A present
    /// row is a no-op, which keeps undo replay idempotent.
    pub fn insert_absent(&self, table: &str, row: &Row) -> DbResult<usize> {
        {
            let tables = self.tables.read();
            let state = lookup(&tables, table)?;
            if state.rows.iter().any(|r| r.same_identity(row)) {
                return Ok(0);
            }
        }
        self.write_block(table, std::slice::from_ref(row), WriteMode::Append)
    }

    /// Returns statistics for a table, computed from the current contents.
    pub fn get_stats(&self, table: &str) -> DbResult<Statistic> {
        let tables = self.tables.read();
        let state = lookup(&tables, table)?;

        let n_r = state.rows.len() as u64;
        let l_r: u64 = state
            .schema
            .columns
            .iter()
            .map(|c| c.ty.size_hint() as u64)
            .sum::<u64>()
            .max(1);
        let f_r = ((BLOCK_SIZE as u64) / l_r).max(1);
        let b_r = n_r.div_ceil(f_r);

        let mut v_a_r = HashMap::new();
        for column in &state.schema.columns {
            let mut seen: Vec<String> = state
                .rows
                .iter()
                .filter_map(|row| row.get(&column.name))
                .filter(|v| !v.is_null())
                .map(|v| v.to_string())
                .collect();
            seen.sort();
            seen.dedup();
            v_a_r.insert(column.name.clone(), seen.len() as u64);
        }

        let indexes = state
            .indexes
            .iter()
            .map(|(column, index)| {
                let descriptor = match index.kind() {
                    IndexKind::Hash => IndexDescriptor::hash(),
                    IndexKind::BTree => IndexDescriptor::btree(index.height_estimate()),
                };
                (column.clone(), descriptor)
            })
            .collect();

        Ok(Statistic {
            n_r,
            b_r,
            l_r,
            f_r,
            v_a_r,
            indexes,
        })
    }

    /// Creates a secondary index over `column`. Indexes live in memory only.
    pub fn create_index(&self, table: &str, column: &str, kind: IndexKind) -> DbResult<()> {
        let mut tables = self.tables.write();
        let state = match tables.get_mut(table) {
            Some(state) => state,
            None => {
                return Err(DbError::TableMissing {
                    table: table.to_string(),
                })
            }
        };
        if state.schema.column(column).is_none() {
            return Err(DbError::ColumnMissing {
                column: column.to_string(),
                table: table.to_string(),
            });
        }
        state.indexes.insert(
            column.to_string(),
            TableIndex::build(kind, column, &state.rows),
        );
        Ok(())
    }

    /// Returns the schema of `table`.
    pub fn schema(&self, table: &str) -> DbResult<Schema> {
        let tables = self.tables.read();
        Ok(lookup(&tables, table)?.schema.clone())
    }

    /// Returns true if `table` exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    /// Lists table names, sorted.
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn save_schemas(&self, tables: &HashMap<String, TableState>) -> DbResult<()> {
        let schemas: HashMap<&String, &Schema> =
            tables.iter().map(|(name, state)| (name, &state.schema)).collect();
        let text = serde_json::to_string_pretty(&schemas).map_err(|e| DbError::Internal {
            message: format!("schema serialization failed: {}", e),
        })?;
        fs::write(self.data_dir.join(SCHEMA_FILE), text)?;
        Ok(())
    }
}

fn table_path(data_dir: &Path, table: &str) -> PathBuf {
    data_dir.join(format!("{}.tbl", table))
}

fn lookup<'a>(
    tables: &'a HashMap<String, TableState>,
    table: &str,
) -> DbResult<&'a TableState> {
    tables.get(table).ok_or_else(|| DbError::TableMissing {
        table: table.to_string(),
    })
}

fn load_rows(path: &Path) -> DbResult<Vec<Row>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let row: Row = serde_json::from_str(line).map_err(|e| DbError::Internal {
            message: format!("corrupt row in {}: {}", path.display(), e),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn save_rows(path: &Path, rows: &[Row]) -> DbResult<()> {
    let mut file = fs::File::create(path)?;
    for row in rows {
        let line = serde_json::to_string(row).map_err(|e| DbError::Internal {
            message: format!("row serialization failed: {}", e),
        })?;
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Verifies a condition's column exists and its operand type is compatible
/// with the column type.
fn check_condition(schema: &Schema, table: &str, condition: &Condition) -> DbResult<()> {
    let column = schema
        .column(&condition.column)
        .ok_or_else(|| DbError::ColumnMissing {
            column: condition.column.clone(),
            table: table.to_string(),
        })?;
    let compatible = match (&column.ty, &condition.value) {
        (_, Value::Null) => true,
        (ColumnType::Integer | ColumnType::Float, Value::Int(_) | Value::Float(_)) => {
            condition.op != CompareOp::Like
        }
        (ColumnType::Char(_) | ColumnType::Varchar(_), Value::Str(_)) => true,
        _ => false,
    };
    if !compatible {
        return Err(DbError::TypeMismatch {
            expected: column.ty.sql_name(),
            actual: condition.value.kind_name().to_string(),
        });
    }
    Ok(())
}

/// Picks candidate row positions, going through an index when one of the
/// conditions can use it; otherwise every position is a candidate.
fn candidate_positions(state: &TableState, conditions: &[Condition]) -> Vec<usize> {
    for condition in conditions {
        // Index keys never hold NULL; a NULL operand matches nothing anyway.
        if condition.value.is_null() {
            continue;
        }
        if let Some(index) = state.indexes.get(&condition.column) {
            let positions = match condition.op {
                CompareOp::Eq => index.lookup_eq(&condition.value),
                CompareOp::Lt | CompareOp::LtEq | CompareOp::Gt | CompareOp::GtEq => {
                    index.lookup_range(condition.op, &condition.value)
                }
                _ => None,
            };
            if let Some(mut positions) = positions {
                positions.sort_unstable();
                return positions;
            }
        }
    }
    (0..state.rows.len()).collect()
}

fn check_primary_key(
    schema: &Schema,
    table: &str,
    existing: &[Row],
    incoming: &[Row],
) -> DbResult<()> {
    let Some(pk) = schema.primary_key() else {
        return Ok(());
    };
    let mut seen: Vec<&Value> = existing.iter().filter_map(|row| row.get(pk)).collect();
    for row in incoming {
        let value = row.get(pk).unwrap_or(&Value::Null);
        if value.is_null() {
            return Err(DbError::SchemaInvalid {
                message: format!("primary key '{}' cannot be NULL", pk),
            });
        }
        if seen.iter().any(|v| v.eq_coerced(value)) {
            return Err(DbError::PkViolation {
                table: table.to_string(),
                column: pk.to_string(),
            });
        }
        seen.push(value);
    }
    Ok(())
}

fn check_foreign_keys(
    tables: &HashMap<String, TableState>,
    table: &str,
    incoming: &[Row],
) -> DbResult<()> {
    let schema = &lookup(tables, table)?.schema;
    for fk in &schema.foreign_keys {
        let referenced = lookup(tables, &fk.ref_table)?;
        for row in incoming {
            let value = row.get(&fk.column).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }
            let found = referenced.rows.iter().any(|r| {
                r.get(&fk.ref_column).is_some_and(|v| v.eq_coerced(value))
            });
            if !found {
                return Err(DbError::FkViolation {
                    table: table.to_string(),
                    message: format!(
                        "'{}' = {} has no match in {}({})",
                        fk.column, value, fk.ref_table, fk.ref_column
                    ),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ForeignKey};
    use tempfile::TempDir;

    fn users_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("id", ColumnType::Integer).primary_key(),
            ColumnDef::new("score", ColumnType::Integer),
            ColumnDef::new("status", ColumnType::Varchar(16)),
        ])
    }

    fn user_row(id: i64, score: i64, status: &str) -> Row {
        Row::from_pairs([
            ("id".to_string(), Value::Int(id)),
            ("score".to_string(), Value::Int(score)),
            ("status".to_string(), Value::string(status)),
        ])
    }

    fn open_with_users(dir: &TempDir) -> StorageManager {
        let storage = StorageManager::open(dir.path()).unwrap();
        storage.create_table("users", users_schema()).unwrap();
        storage
            .write_block(
                "users",
                &[
                    user_row(1, 100, "active"),
                    user_row(2, 50, "idle"),
                    user_row(3, 75, "active"),
                ],
                WriteMode::Append,
            )
            .unwrap();
        storage
    }

    #[test]
    fn test_create_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(dir.path()).unwrap();
        storage.create_table("users", users_schema()).unwrap();
        assert!(matches!(
            storage.create_table("users", users_schema()),
            Err(DbError::TableExists { .. })
        ));
    }

    #[test]
    fn test_read_with_conditions_and_projection() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let request = ReadRequest::all("users")
            .with_columns(vec!["id".to_string(), "status".to_string()])
            .with_condition(Condition::new(
                "status",
                CompareOp::Eq,
                Value::string("active"),
            ));
        let rows = storage.read_block(&request).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].column_names().collect::<Vec<_>>(),
            vec!["id", "status"]
        );
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let request =
            ReadRequest::all("users").with_condition(Condition::eq("id", Value::Int(99)));
        assert!(storage.read_block(&request).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_table_and_column() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        assert!(matches!(
            storage.read_block(&ReadRequest::all("ghosts")),
            Err(DbError::TableMissing { .. })
        ));
        let request = ReadRequest::all("users").with_columns(vec!["ghost".to_string()]);
        assert!(matches!(
            storage.read_block(&request),
            Err(DbError::ColumnMissing { .. })
        ));
    }

    #[test]
    fn test_condition_type_mismatch() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let request = ReadRequest::all("users")
            .with_condition(Condition::eq("id", Value::string("one")));
        assert!(matches!(
            storage.read_block(&request),
            Err(DbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_numeric_coercion_in_read() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let request =
            ReadRequest::all("users").with_condition(Condition::eq("id", Value::Float(1.0)));
        assert_eq!(storage.read_block(&request).unwrap().len(), 1);
    }

    #[test]
    fn test_primary_key_enforced() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        assert!(matches!(
            storage.write_block("users", &[user_row(1, 0, "dup")], WriteMode::Append),
            Err(DbError::PkViolation { .. })
        ));
    }

    #[test]
    fn test_update_by_old_new_and_idempotent_miss() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let pairs = vec![(user_row(1, 100, "active"), user_row(1, 200, "premium"))];
        assert_eq!(storage.update_by_old_new("users", &pairs).unwrap(), 1);
        // The old image no longer matches; re-applying is a no-op.
        assert_eq!(storage.update_by_old_new("users", &pairs).unwrap(), 0);

        let request = ReadRequest::all("users").with_condition(Condition::eq("id", Value::Int(1)));
        let rows = storage.read_block(&request).unwrap();
        assert_eq!(rows[0].get("score"), Some(&Value::Int(200)));
    }

    #[test]
    fn test_delete_block_and_exact() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let deleted = storage
            .delete_block(
                "users",
                &[Condition::new("score", CompareOp::Lt, Value::Int(80))],
            )
            .unwrap();
        assert_eq!(deleted, 2);

        assert_eq!(
            storage.delete_exact("users", &user_row(1, 100, "active")).unwrap(),
            1
        );
        // Idempotent: the row is already gone.
        assert_eq!(
            storage.delete_exact("users", &user_row(1, 100, "active")).unwrap(),
            0
        );
    }

    #[test]
    fn test_foreign_key_checks() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let profiles = Schema::new(vec![
            ColumnDef::new("user_id", ColumnType::Integer),
            ColumnDef::new("bio", ColumnType::Varchar(64)),
        ])
        .with_foreign_key(ForeignKey {
            column: "user_id".to_string(),
            ref_table: "users".to_string(),
            ref_column: "id".to_string(),
        });
        storage.create_table("profiles", profiles).unwrap();

        let good = Row::from_pairs([
            ("user_id".to_string(), Value::Int(1)),
            ("bio".to_string(), Value::string("hello")),
        ]);
        assert_eq!(
            storage.write_block("profiles", &[good], WriteMode::Append).unwrap(),
            1
        );

        let bad = Row::from_pairs([
            ("user_id".to_string(), Value::Int(404)),
            ("bio".to_string(), Value::string("nobody")),
        ]);
        assert!(matches!(
            storage.write_block("profiles", &[bad], WriteMode::Append),
            Err(DbError::FkViolation { .. })
        ));

        // users is referenced: RESTRICT refuses, CASCADE drops the constraint.
        assert!(matches!(
            storage.drop_table("users", DropBehavior::Restrict),
            Err(DbError::FkViolation { .. })
        ));
        storage.drop_table("users", DropBehavior::Cascade).unwrap();
        assert!(storage.schema("profiles").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_users(&dir);
        let stats = storage.get_stats("users").unwrap();
        assert_eq!(stats.n_r, 3);
        assert!(stats.b_r >= 1);
        assert_eq!(stats.distinct("status"), 2);
        assert!(stats.index_on("id").is_some());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let _storage = open_with_users(&dir);
        }
        let reopened = StorageManager::open(dir.path()).unwrap();
        assert!(reopened.has_table("users"));
        let rows = reopened.read_block(&ReadRequest::all("users")).unwrap();
        assert_eq!(rows.len(), 3);
        // Schema order survives the round trip.
        assert_eq!(
            rows[0].column_names().collect::<Vec<_>>(),
            vec!["id", "score", "status"]
        );
    }
}
