//! PostgreSQL integration tests.
//!
//! Built with the `postgres` feature. Each test skips unless
//! `SANDBOX_TEST_POSTGRES_URL` points at a server the tests may write to.

#![cfg(feature = "postgres")]

use sandbox_engine::{
    BackendKind, ExecutionMode, Sandbox, SandboxConfig, StatementStatus, ValidationMethod,
};

fn connect() -> Option<Sandbox> {
    let Ok(url) = std::env::var("SANDBOX_TEST_POSTGRES_URL") else {
        eprintln!("Skipping test - SANDBOX_TEST_POSTGRES_URL not set");
        return None;
    };
    let config = SandboxConfig::builder()
        .backend(BackendKind::Postgres)
        .database_url(url)
        .pool_size(1, 4)
        .build();
    Some(Sandbox::from_config(config).expect("Failed to build sandbox"))
}

fn unique_session(name: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}_{}", name, nanos % 100_000)
}

#[tokio::test]
async fn test_postgres_setup_rolls_back_ddl() {
    let Some(sandbox) = connect() else { return };
    let session = unique_session("pgsetup");

    let result = sandbox
        .execute_script(
            "CREATE TABLE t (id INT); INSERT INTO t VALUES (1); INSERT INTO bogus VALUES (1);",
            Some(&session),
            ExecutionMode::Setup,
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.rolled_back);
    let error = result.statements[2].error.as_ref().unwrap();
    assert_eq!(error.code.as_deref(), Some("42P01"));

    let check = sandbox
        .execute_script("SELECT * FROM t", Some(&session), ExecutionMode::Adhoc)
        .await
        .unwrap();
    assert_eq!(check.statements[0].status, StatementStatus::Failed);
}

#[tokio::test]
async fn test_postgres_adhoc_and_cleanup() {
    let Some(sandbox) = connect() else { return };
    let session = unique_session("pgadhoc");

    let result = sandbox
        .execute_script(
            "CREATE TABLE t (id INT); INSERT INTO t VALUES (1), (2); SELECT count(*) FROM t;",
            Some(&session),
            ExecutionMode::Adhoc,
        )
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements[1].rows_affected, Some(2));
    assert_eq!(result.statements[2].rows[0][0].as_i64(), Some(2));

    let drop = sandbox
        .execute_script("DROP TABLE t", Some(&session), ExecutionMode::Adhoc)
        .await
        .unwrap();
    assert!(drop.success);
}

#[tokio::test]
async fn test_postgres_dollar_quoted_function() {
    let Some(sandbox) = connect() else { return };
    let session = unique_session("pgfunc");

    let script = "\
CREATE OR REPLACE FUNCTION add_one(i INT) RETURNS INT AS $$
BEGIN
  RETURN i + 1;
END;
$$ LANGUAGE plpgsql;
SELECT add_one(41);
";
    let statements = sandbox.split_statements(script);
    assert_eq!(statements.len(), 2);

    let result = sandbox
        .execute_script(script, Some(&session), ExecutionMode::Setup)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.first_error());
    assert_eq!(result.statements[1].rows[0][0].as_i64(), Some(42));

    sandbox
        .execute_script("DROP FUNCTION add_one(INT)", None, ExecutionMode::Adhoc)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_postgres_validation() {
    let Some(sandbox) = connect() else { return };

    let ok = sandbox.validate_query("SELECT 1").await.unwrap();
    assert!(ok.valid);
    assert_eq!(ok.method, ValidationMethod::ParseOnly);

    let bad = sandbox
        .validate_query("CREATE TABLE v (id INT); INSERT INTO v VALUES ('x');")
        .await
        .unwrap();
    assert!(!bad.valid);
    assert_eq!(bad.ordinal, Some(2));
    assert_eq!(bad.method, ValidationMethod::RolledBackTransaction);
}
