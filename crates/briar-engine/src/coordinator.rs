//! The transaction coordinator.
//!
//! Owns per-client session state, the write buffers, and the commit/abort
//! pipelines. Writes follow the WAL discipline: every operation is appended
//! to the log before its mirror can reach storage. Crossing the checkpoint
//! threshold flushes every active transaction's unflushed buffer tail to
//! storage and appends the `CHECKPOINT` marker; an abort discards the
//! buffer and replays the log's inverse operations for anything a
//! checkpoint already flushed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use briar_cc::{AlgorithmKind, CcManager, TxnOutcome};
use briar_common::constants::WAL_FILE;
use briar_common::{ClientId, DatabaseConfig, DbError, DbResult, Row, TxnId};
use briar_optimizer::cost::StatsMap;
use briar_optimizer::{GaConfig, Optimizer};
use briar_sql::parse_statement;
use briar_storage::{
    ColumnDef, ColumnType, DropBehavior, ForeignKey, Schema, StorageManager, WriteMode,
};
use briar_tree::refs::{collect_tables, extract_column_name};
use briar_tree::{NodeType, QueryNode};
use briar_wal::{RecoveryLog, StorageOp};

use crate::buffer::{BufferedOp, CollapsedGroup, OpKind, TxnBuffer};
use crate::executor::{ExecOutcome, Executor};

/// The client-visible result of one statement.
#[derive(Debug)]
pub enum StatementResult {
    /// A SELECT result.
    Rows {
        /// Output column names, in order.
        columns: Vec<String>,
        /// Result rows.
        rows: Vec<Row>,
    },
    /// A DML result: affected row count.
    Count(usize),
    /// An acknowledgement for DDL and transaction control.
    Ack(String),
}

/// State of one active transaction. The owning client is tracked in the
/// coordinator's `client_txn` map.
struct ActiveTxn {
    explicit: bool,
    logged: bool,
    buffer: TxnBuffer,
}

type TxnHandle = Arc<Mutex<ActiveTxn>>;

/// The transaction coordinator: session state, buffering, commit batching,
/// and abort recovery.
pub struct TransactionCoordinator {
    config: DatabaseConfig,
    storage: Arc<StorageManager>,
    wal: Arc<RecoveryLog>,
    cc: Arc<CcManager>,
    optimizer: Optimizer,
    /// Active transactions; handles are locked briefly, never across a
    /// blocking operation.
    active: Mutex<HashMap<TxnId, TxnHandle>>,
    /// Current transaction per client.
    client_txn: Mutex<HashMap<ClientId, TxnId>>,
    /// Serializes checkpoints.
    checkpoint_gate: Mutex<()>,
}

impl TransactionCoordinator {
    /// Opens a database: storage, recovery log, and concurrency manager.
    ///
    /// A crash-recovery sweep runs before the first statement: writes at or
    /// after the newest checkpoint are redone and loser transactions are
    /// rolled back, both idempotently.
    pub fn open(config: DatabaseConfig) -> DbResult<Self> {
        config.validate().map_err(|message| DbError::SchemaInvalid {
            message,
        })?;
        let storage = Arc::new(StorageManager::open(&config.data_dir)?);
        let wal = Arc::new(RecoveryLog::open(
            config.data_dir.join(WAL_FILE),
            config.checkpoint_threshold,
        )?);

        let coordinator = Self {
            config,
            storage,
            wal,
            cc: Arc::new(CcManager::new(AlgorithmKind::WaitDie)),
            optimizer: Optimizer::new(),
            active: Mutex::new(HashMap::new()),
            client_txn: Mutex::new(HashMap::new()),
            checkpoint_gate: Mutex::new(()),
        };
        coordinator.recover_on_open()?;
        info!(dir = %coordinator.config.data_dir.display(), "database opened");
        Ok(coordinator)
    }

    /// Overrides the genetic search configuration (tests shrink it).
    #[must_use]
    pub fn with_ga_config(mut self, ga: GaConfig) -> Self {
        self.optimizer = Optimizer::new().with_ga_config(ga);
        self
    }

    /// The storage manager.
    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// The recovery log.
    pub fn wal(&self) -> &Arc<RecoveryLog> {
        &self.wal
    }

    /// The concurrency control manager.
    pub fn cc(&self) -> &Arc<CcManager> {
        &self.cc
    }

    /// True if the client has an open explicit transaction.
    pub fn in_transaction(&self, client: ClientId) -> bool {
        self.client_txn.lock().contains_key(&client)
    }

    /// Swaps the concurrency control algorithm (quiescent state only).
    pub fn change_algorithm(&self, kind: AlgorithmKind) -> DbResult<()> {
        self.cc.change_algorithm(kind)
    }

    /// Executes one client line: SQL, `ABORT`, or `SET ALGORITHM <name>`.
    pub fn execute_sql(&self, client: ClientId, sql: &str) -> DbResult<StatementResult> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "ABORT" || upper == "ROLLBACK" {
            self.abort(client, "client abort")?;
            return Ok(StatementResult::Ack("transaction aborted".to_string()));
        }
        if let Some(name) = upper.strip_prefix("SET ALGORITHM ") {
            let kind = AlgorithmKind::parse(name.trim()).ok_or_else(|| {
                DbError::parse(0, format!("unknown algorithm '{}'", name.trim()))
            })?;
            self.change_algorithm(kind)?;
            return Ok(StatementResult::Ack(format!(
                "algorithm set to {}",
                name.trim().to_ascii_lowercase()
            )));
        }

        let tree = parse_statement(sql)?;
        self.execute_tree(client, &tree)
    }

    /// Executes one parsed statement for a client.
    pub fn execute_tree(
        &self,
        client: ClientId,
        tree: &QueryNode,
    ) -> DbResult<StatementResult> {
        match tree.node_type {
            NodeType::BeginTransaction => {
                if tree.children.is_empty() {
                    self.begin(client, true)?;
                    return Ok(StatementResult::Ack("transaction started".to_string()));
                }
                // A batched transaction tree: run the children in order.
                self.begin(client, true)?;
                let mut last = StatementResult::Ack("transaction started".to_string());
                for child in &tree.children {
                    last = self.execute_tree(client, child)?;
                }
                Ok(last)
            }
            NodeType::Commit => {
                self.commit(client)?;
                Ok(StatementResult::Ack("transaction committed".to_string()))
            }
            NodeType::CreateTable => {
                let schema = schema_from_tree(tree)?;
                self.storage.create_table(&tree.value, schema)?;
                Ok(StatementResult::Ack(format!("table '{}' created", tree.value)))
            }
            NodeType::DropTable => {
                let behavior = match tree.get_child(0).map(|c| c.value.as_str()) {
                    Some("CASCADE") => DropBehavior::Cascade,
                    _ => DropBehavior::Restrict,
                };
                self.storage.drop_table(&tree.value, behavior)?;
                Ok(StatementResult::Ack(format!("table '{}' dropped", tree.value)))
            }
            _ => self.execute_statement(client, tree),
        }
    }

    // =========================================================================
    // Transaction lifecycle
    // =========================================================================

    /// Begins a transaction. Explicit `BEGIN` rejects nesting; the implicit
    /// auto-commit wrapper reuses an open explicit transaction.
    fn begin(&self, client: ClientId, explicit: bool) -> DbResult<TxnId> {
        if let Some(&txn) = self.client_txn.lock().get(&client) {
            if explicit {
                return Err(DbError::TransactionInProgress { txn_id: txn });
            }
            return Ok(txn);
        }
        let txn = self.cc.begin(client);
        // An explicit BEGIN hits the log right away; the implicit
        // auto-commit wrapper logs lazily at its first write, so read-only
        // statements leave no trace.
        if explicit {
            self.wal.log_begin(txn)?;
        }
        self.active.lock().insert(
            txn,
            Arc::new(Mutex::new(ActiveTxn {
                explicit,
                logged: explicit,
                buffer: TxnBuffer::new(),
            })),
        );
        self.client_txn.lock().insert(client, txn);
        debug!(%txn, %client, explicit, "transaction started");
        Ok(txn)
    }

    fn handle_of(&self, txn: TxnId) -> DbResult<TxnHandle> {
        self.active.lock().get(&txn).cloned().ok_or_else(|| {
            DbError::internal(format!("transaction {} has no active state", txn))
        })
    }

    /// Commits the client's transaction: collapse, flush, log, release.
    pub fn commit(&self, client: ClientId) -> DbResult<()> {
        let txn = self
            .client_txn
            .lock()
            .get(&client)
            .copied()
            .ok_or(DbError::NoTransaction)?;
        let handle = self.handle_of(txn)?;

        let (groups, logged) = {
            let guard = handle.lock();
            let groups = guard
                .buffer
                .collapse_unflushed(|table| self.primary_key_of(table));
            (groups, guard.logged)
        };

        let flush_result = self.flush_groups(&groups);
        if let Err(error) = flush_result {
            warn!(%txn, error = %error, "commit flush failed, aborting");
            // Inverting unapplied groups is a no-op, so a partial flush
            // rolls back cleanly.
            self.rollback_groups(&groups)?;
            self.finish_abort(client, txn, &handle, "commit flush failed")?;
            return Err(error);
        }

        if logged {
            self.wal.log_commit(txn)?;
        }

        // Release locks last; validation-at-commit algorithms may refuse
        // here, in which case the published groups are rolled back.
        if let Err(error) = self.cc.end(txn, TxnOutcome::Commit) {
            warn!(%txn, error = %error, "commit validation failed, rolling back");
            self.rollback_groups(&groups)?;
            if logged {
                let undo = self.wal.recover_transaction(txn)?;
                self.apply_storage_ops(&undo)?;
            }
            self.forget(client, txn);
            return Err(error);
        }

        self.forget(client, txn);
        debug!(%txn, groups = groups.len(), "transaction committed");
        Ok(())
    }

    /// Aborts the client's transaction through the undo pipeline.
    pub fn abort(&self, client: ClientId, reason: &str) -> DbResult<()> {
        let txn = self
            .client_txn
            .lock()
            .get(&client)
            .copied()
            .ok_or(DbError::NoTransaction)?;
        let handle = self.handle_of(txn)?;
        self.finish_abort(client, txn, &handle, reason)
    }

    fn finish_abort(
        &self,
        client: ClientId,
        txn: TxnId,
        handle: &TxnHandle,
        reason: &str,
    ) -> DbResult<()> {
        // Still-in-memory writes never reach storage.
        let logged = {
            let mut guard = handle.lock();
            guard.buffer.clear();
            guard.logged
        };
        if logged {
            let undo = self.wal.recover_transaction(txn)?;
            self.apply_storage_ops(&undo)?;
        }
        let _ = self.cc.end(txn, TxnOutcome::Abort);
        self.forget(client, txn);
        debug!(%txn, reason, "transaction aborted");
        Ok(())
    }

    fn forget(&self, client: ClientId, txn: TxnId) {
        self.active.lock().remove(&txn);
        self.client_txn.lock().remove(&client);
    }

    // =========================================================================
    // Statement execution
    // =========================================================================

    fn execute_statement(
        &self,
        client: ClientId,
        tree: &QueryNode,
    ) -> DbResult<StatementResult> {
        let txn = self.begin(client, false)?;
        let handle = self.handle_of(txn)?;
        let explicit = handle.lock().explicit;

        let result = self.run_statement(txn, &handle, tree);
        match result {
            Ok(outcome) => {
                if !explicit {
                    self.commit(client)?;
                }
                Ok(outcome)
            }
            Err(error) => {
                if error.aborts_transaction() {
                    // Protocol, resource, and internal failures run the full
                    // abort pipeline.
                    self.finish_abort(client, txn, &handle, "statement failure")?;
                } else if !explicit {
                    // A benign failure in auto-commit just drops the
                    // implicit transaction; nothing was buffered.
                    self.finish_abort(client, txn, &handle, "auto-commit cleanup")?;
                }
                Err(error)
            }
        }
    }

    fn run_statement(
        &self,
        txn: TxnId,
        handle: &TxnHandle,
        tree: &QueryNode,
    ) -> DbResult<StatementResult> {
        // Snapshot the buffer so no lock is held while the executor blocks
        // on concurrency control.
        let snapshot = {
            let guard = handle.lock();
            let mut snapshot = TxnBuffer::new();
            for op in guard.buffer.ops() {
                snapshot.push(op.clone());
            }
            snapshot
        };

        let is_query = matches!(
            tree.node_type,
            NodeType::Project | NodeType::Filter | NodeType::Sort | NodeType::Limit
        );
        let plan;
        let to_run = if is_query {
            let stats = self.stats_snapshot(tree);
            plan = self.optimizer.optimize(tree, &stats)?;
            &plan.tree
        } else {
            tree
        };

        let executor = Executor::new(&self.storage, &self.cc, &snapshot, txn);
        match executor.execute(to_run)? {
            ExecOutcome::Rows(rows) => {
                let columns = self.output_columns(to_run, &rows);
                Ok(StatementResult::Rows { columns, rows })
            }
            ExecOutcome::Mutation { count, ops } => {
                self.record_ops(txn, handle, ops)?;
                Ok(StatementResult::Count(count))
            }
        }
    }

    /// Logs and buffers a statement's operations, checkpointing when the
    /// log crosses the threshold (WAL discipline: log first).
    fn record_ops(
        &self,
        txn: TxnId,
        handle: &TxnHandle,
        ops: Vec<BufferedOp>,
    ) -> DbResult<()> {
        let mut need_checkpoint = false;
        {
            let mut guard = handle.lock();
            for op in ops {
                if !guard.logged {
                    self.wal.log_begin(txn)?;
                    guard.logged = true;
                }
                let crossed =
                    self.wal
                        .log_write(txn, &op.table, op.old.clone(), op.new.clone())?;
                guard.buffer.push(op);
                if crossed {
                    // This buffer flushes inside its own critical section;
                    // the other transactions' buffers and the marker follow
                    // once the lock is released.
                    self.flush_buffer(&mut guard.buffer)?;
                    need_checkpoint = true;
                }
            }
        }
        if need_checkpoint {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Flushes every active transaction's unflushed tail to storage and
    /// appends the `CHECKPOINT` marker.
    pub fn checkpoint(&self) -> DbResult<()> {
        let _gate = self.checkpoint_gate.lock();
        let handles: Vec<TxnHandle> = self.active.lock().values().cloned().collect();
        for handle in handles {
            let mut guard = handle.lock();
            self.flush_buffer(&mut guard.buffer)?;
        }
        self.wal.checkpoint()?;
        debug!("checkpoint finished");
        Ok(())
    }

    /// Pushes a buffer's unflushed tail into storage, in insertion order.
    fn flush_buffer(&self, buffer: &mut TxnBuffer) -> DbResult<()> {
        for op in buffer.unflushed() {
            self.apply_buffered_op(op)?;
        }
        buffer.mark_flushed();
        Ok(())
    }

    fn apply_buffered_op(&self, op: &BufferedOp) -> DbResult<()> {
        match op.kind {
            OpKind::Insert => {
                if let Some(new) = &op.new {
                    self.storage
                        .write_block(&op.table, std::slice::from_ref(new), WriteMode::Append)?;
                }
            }
            OpKind::Update => {
                if let (Some(old), Some(new)) = (&op.old, &op.new) {
                    self.storage
                        .update_by_old_new(&op.table, &[(old.clone(), new.clone())])?;
                }
            }
            OpKind::Delete => {
                if let Some(old) = &op.old {
                    self.storage.delete_exact(&op.table, old)?;
                }
            }
        }
        Ok(())
    }

    /// Applies collapsed groups through the batched storage API.
    fn flush_groups(&self, groups: &[CollapsedGroup]) -> DbResult<()> {
        for group in groups {
            match group.kind {
                OpKind::Insert => {
                    self.storage
                        .write_block(&group.table, &group.inserts, WriteMode::Append)?;
                }
                OpKind::Update => {
                    self.storage.update_by_old_new(&group.table, &group.updates)?;
                }
                OpKind::Delete => {
                    for row in &group.deletes {
                        self.storage.delete_exact(&group.table, row)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Rolls freshly flushed groups back out (commit-time validation
    /// failure).
    fn rollback_groups(&self, groups: &[CollapsedGroup]) -> DbResult<()> {
        for group in groups.iter().rev() {
            match group.kind {
                OpKind::Insert => {
                    for row in &group.inserts {
                        self.storage.delete_exact(&group.table, row)?;
                    }
                }
                OpKind::Update => {
                    let inverted: Vec<(Row, Row)> = group
                        .updates
                        .iter()
                        .map(|(old, new)| (new.clone(), old.clone()))
                        .collect();
                    self.storage.update_by_old_new(&group.table, &inverted)?;
                }
                OpKind::Delete => {
                    for row in &group.deletes {
                        self.storage.insert_absent(&group.table, row)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies undo/redo operations from the recovery log, idempotently.
    fn apply_storage_ops(&self, ops: &[StorageOp]) -> DbResult<()> {
        for op in ops {
            match op {
                StorageOp::Insert { table, row } => {
                    if self.storage.has_table(table) {
                        self.storage.insert_absent(table, row)?;
                    }
                }
                StorageOp::Delete { table, row } => {
                    if self.storage.has_table(table) {
                        self.storage.delete_exact(table, row)?;
                    }
                }
                StorageOp::Update { table, old, new } => {
                    if self.storage.has_table(table) {
                        self.storage
                            .update_by_old_new(table, &[(old.clone(), new.clone())])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn recover_on_open(&self) -> DbResult<()> {
        let recovery = self.wal.recover_crash()?;
        if recovery.redo.is_empty() && recovery.undo.is_empty() {
            return Ok(());
        }
        info!(
            redo = recovery.redo.len(),
            undo = recovery.undo.len(),
            "running crash recovery"
        );
        self.apply_storage_ops(&recovery.redo)?;
        self.apply_storage_ops(&recovery.undo)?;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn primary_key_of(&self, table: &str) -> Option<String> {
        self.storage
            .schema(table)
            .ok()
            .and_then(|schema| schema.primary_key().map(str::to_string))
    }

    /// Statistics snapshot for every table (and alias) the tree mentions.
    fn stats_snapshot(&self, tree: &QueryNode) -> StatsMap {
        let mut stats = StatsMap::new();
        for table in collect_tables(tree) {
            if let Ok(stat) = self.storage.get_stats(&table) {
                stats.insert(table, stat);
            }
        }
        // Aliases resolve to their base table's statistics.
        tree.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Alias) {
                if let Some(base) = node.get_child(0) {
                    if base.is_type(NodeType::Relation) {
                        if let Ok(stat) = self.storage.get_stats(&base.value) {
                            stats.insert(node.value.clone(), stat);
                        }
                    }
                }
            }
        });
        stats
    }

    /// Output column names for a SELECT: the projection list, or every base
    /// table's schema columns for `*`.
    fn output_columns(&self, plan: &QueryNode, rows: &[Row]) -> Vec<String> {
        if let Some(first) = rows.first() {
            return first.column_names().map(str::to_string).collect();
        }
        let mut projections = Vec::new();
        plan.visit_preorder(&mut |node| {
            if node.is_type(NodeType::Project) && projections.is_empty() {
                if node.value == "*" {
                    for table in collect_tables(node) {
                        if let Ok(schema) = self.storage.schema(&table) {
                            projections.extend(schema.column_names());
                        }
                    }
                } else {
                    projections.extend(
                        node.children[0].children.iter().filter_map(extract_column_name),
                    );
                }
            }
        });
        projections
    }
}

/// Builds a storage schema from a `CREATE_TABLE` tree.
fn schema_from_tree(tree: &QueryNode) -> DbResult<Schema> {
    let mut columns = Vec::new();
    let mut foreign_keys = Vec::new();
    for def in &tree.children[0].children {
        let type_text = def
            .get_child(0)
            .map(|c| c.value.as_str())
            .unwrap_or_default();
        let ty = ColumnType::parse(type_text).ok_or_else(|| DbError::SchemaInvalid {
            message: format!("unknown column type '{}'", type_text),
        })?;
        let mut column = ColumnDef::new(def.value.clone(), ty);
        for extra in def.children.iter().skip(1) {
            if extra.is_value("PRIMARY KEY") {
                column.primary_key = true;
            } else if extra.is_type(NodeType::List) && extra.children.len() == 2 {
                let ref_table = extra.children[0]
                    .get_child(0)
                    .map(|c| c.value.clone())
                    .unwrap_or_default();
                let ref_column = extra.children[1]
                    .get_child(0)
                    .map(|c| c.value.clone())
                    .unwrap_or_default();
                foreign_keys.push(ForeignKey {
                    column: def.value.clone(),
                    ref_table,
                    ref_column,
                });
            }
        }
        columns.push(column);
    }
    let mut schema = Schema::new(columns);
    schema.foreign_keys = foreign_keys;
    Ok(schema)
}
