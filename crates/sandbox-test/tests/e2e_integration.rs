//! End-to-end integration tests for the SQL sandbox.
//!
//! These tests drive the public `Sandbox` API against real SQLite files and
//! inspect the database through separate connections.

use std::sync::Arc;

use sandbox_engine::{ExecutionMode, Sandbox, StatementStatus, ValidationMethod};
use sandbox_sql::{namespace_statement, split_statements, SessionToken};
use sandbox_test::workload::{employees_setup, session_ids, EMPLOYEES_QUERY};
use sandbox_test::TestDatabase;

const SCENARIO_SCRIPT: &str =
    "CREATE TABLE t (id INT); INSERT INTO t VALUES (1); INSERT INTO bogus VALUES (1);";

fn setup() -> (TestDatabase, Sandbox) {
    let db = TestDatabase::new().expect("Failed to create database");
    let sandbox = db.sandbox().expect("Failed to build sandbox");
    (db, sandbox)
}

/// Scenario A: adhoc mode keeps the statements that succeeded.
#[tokio::test]
async fn test_scenario_adhoc_partial_failure() {
    let (db, sandbox) = setup();

    let result = sandbox
        .execute_script(SCENARIO_SCRIPT, None, ExecutionMode::Adhoc)
        .await
        .unwrap();

    assert!(!result.success);
    let statuses: Vec<_> = result.statements.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StatementStatus::Succeeded,
            StatementStatus::Succeeded,
            StatementStatus::Failed
        ]
    );
    let error = result.statements[2].error.as_ref().unwrap();
    assert!(error.message.contains("no such table"), "{}", error.message);
    assert_eq!(db.row_count("t").await.unwrap(), 1);
}

/// Scenario B: setup mode leaves nothing behind.
#[tokio::test]
async fn test_scenario_setup_rollback() {
    let (db, sandbox) = setup();

    let result = sandbox
        .execute_script(SCENARIO_SCRIPT, None, ExecutionMode::Setup)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.rolled_back);
    assert!(!db.table_exists("t").await.unwrap());
}

/// Scenario C: two sessions create the same table name without colliding.
#[tokio::test]
async fn test_scenario_session_isolation() {
    let (db, sandbox) = setup();

    for session in ["alice_1", "bob_1"] {
        let result = sandbox
            .execute_script(
                "CREATE TABLE employees (id INT)",
                Some(session),
                ExecutionMode::Setup,
            )
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
    }

    let tables = db.tables().await.unwrap();
    assert_eq!(tables, vec!["alice_1_employees", "bob_1_employees"]);
}

#[tokio::test]
async fn test_adhoc_failure_in_middle_runs_the_rest() {
    let (db, sandbox) = setup();

    let result = sandbox
        .execute_script(
            "CREATE TABLE a (id INT); CREATE TABLE a (id INT); CREATE TABLE c (id INT);",
            None,
            ExecutionMode::Adhoc,
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.statements[1].status, StatementStatus::Failed);
    assert!(db.table_exists("a").await.unwrap());
    assert!(db.table_exists("c").await.unwrap());
}

#[tokio::test]
async fn test_setup_script_with_session_and_query() {
    let (db, sandbox) = setup();

    let result = sandbox
        .execute_script(&employees_setup(5), Some("alice_1"), ExecutionMode::Setup)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements.len(), 8);
    assert_eq!(db.row_count("alice_1_employees").await.unwrap(), 5);

    let result = sandbox
        .execute_script(EMPLOYEES_QUERY, Some("alice_1"), ExecutionMode::Adhoc)
        .await
        .unwrap();
    assert!(result.success);
    let query = &result.statements[0];
    assert_eq!(query.rows.len(), 5);
    assert_eq!(query.rows[0][0].as_str(), Some("employee; 1"));
    assert_eq!(query.rows[0][1].as_str(), Some("Engineering"));
}

#[tokio::test]
async fn test_trigger_body_runs_as_one_statement() {
    let (db, sandbox) = setup();

    let script = "\
CREATE TABLE items (id INT, qty INT);
CREATE TABLE audit (item_id INT);
CREATE TRIGGER items_audit AFTER INSERT ON items
BEGIN
  INSERT INTO audit VALUES (NEW.id);
END;
INSERT INTO items VALUES (1, 5);
";
    let result = sandbox
        .execute_script(script, Some("dan_1"), ExecutionMode::Setup)
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements.len(), 4);
    assert_eq!(db.row_count("dan_1_audit").await.unwrap(), 1);
}

#[tokio::test]
async fn test_trigger_with_case_expression_runs_as_one_statement() {
    let (db, sandbox) = setup();

    let script = "\
CREATE TABLE items (id INT, qty INT);
CREATE TABLE audit (item_id INT, size TEXT);
CREATE TRIGGER items_audit AFTER INSERT ON items
BEGIN
  INSERT INTO audit VALUES (NEW.id, CASE WHEN NEW.qty > 3 THEN 'big' ELSE 'small' END);
  UPDATE audit SET size = upper(size) WHERE item_id = NEW.id;
END;
INSERT INTO items VALUES (1, 5);
";
    let result = sandbox
        .execute_script(script, Some("erin_1"), ExecutionMode::Setup)
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements.len(), 4);
    let rows = db
        .query("SELECT size FROM erin_1_audit WHERE item_id = 1")
        .await
        .unwrap();
    assert_eq!(rows[0][0].as_str(), Some("BIG"));
}

#[tokio::test]
async fn test_session_cte_query_resolves() {
    let (_db, sandbox) = setup();
    sandbox
        .execute_script(&employees_setup(4), Some("frank_1"), ExecutionMode::Setup)
        .await
        .unwrap();

    let result = sandbox
        .execute_script(
            "WITH firsts AS (SELECT id, name FROM employees WHERE id <= 2) \
             SELECT COUNT(*) FROM firsts",
            Some("frank_1"),
            ExecutionMode::Adhoc,
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements[0].rows[0][0].as_i64(), Some(2));
}

#[tokio::test]
async fn test_validate_has_no_side_effects() {
    let (db, sandbox) = setup();
    sandbox
        .execute_script(
            "CREATE TABLE t (id INT); INSERT INTO t VALUES (1), (2);",
            None,
            ExecutionMode::Setup,
        )
        .await
        .unwrap();

    let result = sandbox
        .validate_query("DELETE FROM t; DROP TABLE t; CREATE TABLE u (id INT);")
        .await
        .unwrap();
    assert!(result.valid, "{:?}", result.error);
    assert_eq!(result.method, ValidationMethod::RolledBackTransaction);

    let result = sandbox
        .validate_query("INSERT INTO t VALUES (3); SELECT nope FROM t;")
        .await
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.ordinal, Some(2));

    assert_eq!(db.row_count("t").await.unwrap(), 2);
    assert_eq!(db.tables().await.unwrap(), vec!["t"]);
}

#[tokio::test]
async fn test_bad_session_rejected_before_execution() {
    let (db, sandbox) = setup();

    let result = sandbox
        .execute_script("CREATE TABLE t (id INT)", Some("%%%"), ExecutionMode::Adhoc)
        .await;

    assert!(result.is_err());
    assert!(db.tables().await.unwrap().is_empty());
    assert_eq!(sandbox.pool_stats().acquisitions, 0);
}

#[test]
fn test_statement_count_matches_semicolons() {
    let script = "SELECT 1; SELECT 'a;b'; -- c;d\nSELECT 3; SELECT 4";
    assert_eq!(split_statements(script).len(), 4);
}

#[test]
fn test_namespacing_is_idempotent() {
    let token = SessionToken::sanitize("alice_1").unwrap();
    let scripts = [
        "CREATE TABLE employees (id INT)",
        "SELECT * FROM a, b JOIN c ON b.id = c.id",
        "INSERT INTO t SELECT * FROM s WHERE x = 'FROM q'",
        "UPDATE t SET a = 1",
    ];
    for sql in scripts {
        let once = namespace_statement(sql, &token);
        assert_eq!(namespace_statement(&once, &token), once, "{}", sql);
    }
}

#[test]
fn test_sanitized_tokens_are_well_formed() {
    let inputs = [
        "alice_1",
        "Bob Smith 2024-01-01T10:00:00",
        "日本語_user_42",
        "1234567890123456789012345",
        "___x",
    ];
    for raw in inputs {
        let token = SessionToken::sanitize(raw).unwrap();
        let text = token.as_str();
        assert!(!text.is_empty() && text.len() <= 20, "{}", text);
        assert!(
            text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "{}",
            text
        );
    }
    assert!(SessionToken::sanitize("!!!").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_respect_pool_bounds() {
    let db = TestDatabase::new().unwrap();
    let sandbox = Arc::new(
        sandbox_engine::Sandbox::from_config(db.builder().pool_size(1, 3).build()).unwrap(),
    );

    let sessions = session_ids("user", 12);
    let mut handles = Vec::new();
    for session in sessions.clone() {
        let sandbox = sandbox.clone();
        handles.push(tokio::spawn(async move {
            let result = sandbox
                .execute_script(&employees_setup(3), Some(&session), ExecutionMode::Setup)
                .await
                .unwrap();
            assert!(sandbox.pool_stats().current_size <= 3);
            result
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{:?}", result.first_error());
    }

    let stats = sandbox.pool_stats();
    assert!(stats.current_size <= 3);
    assert_eq!(stats.acquisitions, 12);
    assert_eq!(stats.active_connections, 0);

    for session in &sessions {
        let table = format!("{}_employees", session);
        assert_eq!(db.row_count(&table).await.unwrap(), 3);
    }
}

#[tokio::test]
async fn test_shutdown_closes_pool() {
    let (_db, sandbox) = setup();
    sandbox.initialize().await.unwrap();
    sandbox.shutdown().await;

    let err = sandbox
        .execute_script("SELECT 1", None, ExecutionMode::Adhoc)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("closed"), "{}", err);
}
