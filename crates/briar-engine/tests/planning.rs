//! Planner scenarios: filter pushdown correctness, search quality, and the
//! round-trip laws relating rewritten plans to their originals.

use briar_cc::{AlgorithmKind, CcManager};
use briar_common::{ClientId, DatabaseConfig, Row, Value};
use briar_engine::{Executor, StatementResult, TransactionCoordinator, TxnBuffer};
use briar_optimizer::rules::{eliminate_projections, push_filters_into_joins};
use briar_optimizer::{CostModel, GaConfig, Optimizer};
use briar_sql::parse_statement;
use briar_storage::{ColumnDef, ColumnType, Schema, StorageManager, WriteMode};
use briar_tree::{NodeType, QueryNode};
use tempfile::TempDir;

fn users_profiles_storage(dir: &TempDir) -> StorageManager {
    let storage = StorageManager::open(dir.path()).unwrap();
    storage
        .create_table(
            "users",
            Schema::new(vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key(),
                ColumnDef::new("age", ColumnType::Integer),
            ]),
        )
        .unwrap();
    storage
        .create_table(
            "profiles",
            Schema::new(vec![
                ColumnDef::new("user_id", ColumnType::Integer),
                ColumnDef::new("bio", ColumnType::Varchar(32)),
            ]),
        )
        .unwrap();

    // 100 rows each; only user 42 is older than 99 and only profile 42
    // matches it.
    let users: Vec<Row> = (1..=100)
        .map(|i| {
            Row::from_pairs([
                ("id".to_string(), Value::Int(i)),
                (
                    "age".to_string(),
                    Value::Int(if i == 42 { 100 } else { 30 }),
                ),
            ])
        })
        .collect();
    storage.write_block("users", &users, WriteMode::Append).unwrap();
    let profiles: Vec<Row> = (1..=100)
        .map(|i| {
            Row::from_pairs([
                ("user_id".to_string(), Value::Int(i)),
                ("bio".to_string(), Value::string(format!("bio{}", i))),
            ])
        })
        .collect();
    storage
        .write_block("profiles", &profiles, WriteMode::Append)
        .unwrap();
    storage
}

fn stats_of(storage: &StorageManager) -> briar_optimizer::cost::StatsMap {
    let mut stats = briar_optimizer::cost::StatsMap::new();
    for table in storage.list_tables() {
        stats.insert(table.clone(), storage.get_stats(&table).unwrap());
    }
    stats
}

const PUSHDOWN_SQL: &str = "SELECT * FROM users JOIN profiles \
     ON users.id = profiles.user_id WHERE users.age > 99";

/// Filter pushdown correctness: the planner puts the age filter below the
/// join on the users side, the result is one row, and the estimated cost
/// drops against the pre-pushdown plan.
#[test]
fn filter_pushdown_plan_and_result() {
    let dir = TempDir::new().unwrap();
    let storage = users_profiles_storage(&dir);
    let stats = stats_of(&storage);

    let tree = parse_statement(PUSHDOWN_SQL).unwrap();
    let optimizer = Optimizer::new().with_ga_config(GaConfig {
        population: 20,
        generations: 20,
        seed: Some(3),
        ..GaConfig::default()
    });
    let plan = optimizer.optimize(&tree, &stats).unwrap();

    // Somewhere under the join, a FILTER guards the users side.
    let mut users_side_filter = false;
    plan.tree.visit_preorder(&mut |node| {
        if node.is_type(NodeType::Join) {
            let left = &node.children[0];
            let right = node.children.get(1);
            for side in [Some(left), right].into_iter().flatten() {
                if side.is_type(NodeType::Filter)
                    && briar_tree::refs::collect_tables(side).contains("users")
                {
                    users_side_filter = true;
                }
            }
        }
    });
    assert!(users_side_filter, "plan:\n{}", plan.tree.render());

    // Cost drops against the unrewritten plan.
    let original_cost = optimizer.get_cost(&tree, &stats);
    assert!(plan.cost.total() < original_cost.total());

    // The result is one row.
    let cc = CcManager::new(AlgorithmKind::WaitDie);
    let buffer = TxnBuffer::new();
    let txn = cc.begin(ClientId::new(1));
    let executor = Executor::new(&storage, &cc, &buffer, txn);
    let rows = executor.run_select(&plan.tree).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(42)));
}

/// Pushdown round trip: the rewritten plan produces the same rowset as the
/// original tree on the same dataset.
#[test]
fn pushdown_preserves_rowset() {
    let dir = TempDir::new().unwrap();
    let storage = users_profiles_storage(&dir);
    let stats = stats_of(&storage);
    let tree = parse_statement(PUSHDOWN_SQL).unwrap();
    let rewritten = eliminate_projections(push_filters_into_joins(
        tree.clone_tree(true),
        &stats,
    ));

    let cc = CcManager::new(AlgorithmKind::WaitDie);
    let buffer = TxnBuffer::new();
    let txn = cc.begin(ClientId::new(1));
    let executor = Executor::new(&storage, &cc, &buffer, txn);

    let mut original = executor.run_select(&tree).unwrap();
    let mut pushed = executor.run_select(&rewritten).unwrap();
    let key = |row: &Row| format!("{}", row);
    original.sort_by_key(key);
    pushed.sort_by_key(key);
    assert_eq!(original.len(), pushed.len());
    for (a, b) in original.iter().zip(&pushed) {
        assert!(a.same_identity(b), "{} vs {}", a, b);
    }
}

/// A cascaded plan returns the same row multiset as the uncascaded one.
#[test]
fn cascade_preserves_rowset() {
    let dir = TempDir::new().unwrap();
    let storage = users_profiles_storage(&dir);
    let stats = stats_of(&storage);
    let sql = "SELECT id FROM users WHERE age > 20 AND id < 50 AND id > 10";
    let tree = parse_statement(sql).unwrap();

    let optimizer = Optimizer::new().with_ga_config(GaConfig {
        population: 16,
        generations: 10,
        seed: Some(11),
        ..GaConfig::default()
    });
    let plan = optimizer.optimize(&tree, &stats).unwrap();

    let cc = CcManager::new(AlgorithmKind::WaitDie);
    let buffer = TxnBuffer::new();
    let txn = cc.begin(ClientId::new(1));
    let executor = Executor::new(&storage, &cc, &buffer, txn);

    let mut original = executor.run_select(&tree).unwrap();
    let mut optimized = executor.run_select(&plan.tree).unwrap();
    let key = |row: &Row| {
        row.get("id")
            .map(|v| v.to_string())
            .unwrap_or_default()
    };
    original.sort_by_key(key);
    optimized.sort_by_key(key);
    assert_eq!(original.len(), optimized.len());
    assert_eq!(original, optimized);
}

/// The genetic search matches or beats the identity parameters on a
/// three-way filter with spread-out selectivities (the best individual's
/// fitness is never worse).
#[test]
fn search_beats_identity_on_selective_filter() {
    let dir = TempDir::new().unwrap();
    let storage = StorageManager::open(dir.path()).unwrap();
    storage
        .create_table(
            "events",
            Schema::new(vec![
                ColumnDef::new("device", ColumnType::Integer),
                ColumnDef::new("kind", ColumnType::Integer),
                ColumnDef::new("score", ColumnType::Integer),
            ]),
        )
        .unwrap();
    let rows: Vec<Row> = (0..500)
        .map(|i| {
            Row::from_pairs([
                ("device".to_string(), Value::Int(i % 100)),
                ("kind".to_string(), Value::Int(i % 5)),
                ("score".to_string(), Value::Int(i % 250)),
            ])
        })
        .collect();
    storage.write_block("events", &rows, WriteMode::Append).unwrap();
    let stats = stats_of(&storage);

    let sql = "SELECT * FROM events WHERE kind != 1 AND score > 10 AND device = 7";
    let tree = parse_statement(sql).unwrap();

    let cost = CostModel::new();
    let optimizer = Optimizer::new().with_ga_config(GaConfig {
        seed: Some(42),
        ..GaConfig::default()
    });
    let plan = optimizer.optimize(&tree, &stats).unwrap();

    // Identity parameters leave the AND filter in place.
    let identity_cost = cost.estimate(&tree, &stats).total();
    assert!(plan.chromosome.fitness.unwrap_or(f64::INFINITY) <= identity_cost);
}

/// Planning runs end to end through the coordinator as well.
#[test]
fn coordinator_runs_optimized_select() {
    let dir = TempDir::new().unwrap();
    let db = TransactionCoordinator::open(DatabaseConfig::new(dir.path())).unwrap();
    let client = ClientId::new(1);
    db.execute_sql(
        client,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, age INTEGER);",
    )
    .unwrap();
    for i in 1..=20 {
        db.execute_sql(
            client,
            &format!("INSERT INTO users (id, age) VALUES ({}, {});", i, 20 + i),
        )
        .unwrap();
    }
    let result = db
        .execute_sql(
            client,
            "SELECT id FROM users WHERE age > 30 AND id < 15 ORDER BY id DESC LIMIT 3;",
        )
        .unwrap();
    let StatementResult::Rows { columns, rows } = result else {
        panic!("expected rows");
    };
    assert_eq!(columns, vec!["id".to_string()]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(14)));
}
