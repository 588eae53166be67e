//! Query validation.
//!
//! Validation never leaves a trace in the database. The method depends on
//! what the backend can do:
//!
//! 1. A single statement on a backend with a parse-only facility is checked
//!    with that facility.
//! 2. Otherwise, on backends with transactional DDL, every statement runs
//!    inside a transaction that is always rolled back. Later statements can
//!    then see objects created by earlier ones.
//! 3. Otherwise each statement is checked with the parse-only facility, or
//!    parsed locally when the backend has none.

use std::sync::Arc;

use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::{debug, error, warn};

use sandbox_client::{BackendCapabilities, BackendError, ConnectionPool, PooledConnection};
use sandbox_sql::{Statement, StatementKind, StatementSplitter};

use super::error::{SandboxError, SandboxResult};
use super::result::{ValidationMethod, ValidationResult};

/// Message for queries with no statements.
pub const EMPTY_QUERY: &str = "empty query";

/// Validates queries without side effects.
#[derive(Debug)]
pub struct QueryValidator {
    pool: Arc<ConnectionPool>,
    splitter: StatementSplitter,
    capabilities: BackendCapabilities,
}

impl QueryValidator {
    /// Creates a validator using the pool's backend defaults.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let backend = pool.backend();
        Self {
            splitter: StatementSplitter::new(backend.split_options()),
            capabilities: backend.capabilities(),
            pool,
        }
    }

    /// Overrides the splitter.
    pub fn splitter(mut self, splitter: StatementSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Validates raw query text.
    pub async fn validate(&self, query: &str) -> SandboxResult<ValidationResult> {
        let statements = self.splitter.split(query);
        if statements.is_empty() {
            return Ok(ValidationResult::invalid(
                EMPTY_QUERY,
                None,
                ValidationMethod::LocalSyntax,
            ));
        }

        let caps = self.capabilities;
        if statements.len() > 1 && caps.transactional_ddl {
            return self.validate_in_transaction(&statements).await;
        }
        if caps.parse_only {
            return self.validate_parse_only(&statements).await;
        }
        if caps.transactional_ddl {
            return self.validate_in_transaction(&statements).await;
        }

        debug!("backend has no validation facility, parsing locally");
        Ok(validate_locally(&statements, self.pool.backend().name()))
    }

    async fn validate_parse_only(&self, statements: &[Statement]) -> SandboxResult<ValidationResult> {
        let method = ValidationMethod::ParseOnly;
        let mut conn = self.pool.acquire().await?;

        for statement in statements {
            match conn.parse_only(&statement.text).await {
                Ok(()) => {}
                Err(e) if e.is_connection() => return Err(discard(&mut conn, e)),
                Err(e) => {
                    debug!(ordinal = statement.ordinal, error = %e, "statement failed to parse");
                    return Ok(ValidationResult::invalid(
                        e.message,
                        Some(statement.ordinal),
                        method,
                    ));
                }
            }
        }
        Ok(ValidationResult::valid(method))
    }

    async fn validate_in_transaction(
        &self,
        statements: &[Statement],
    ) -> SandboxResult<ValidationResult> {
        let method = ValidationMethod::RolledBackTransaction;
        let mut conn = self.pool.acquire().await?;

        if let Err(e) = conn.begin().await {
            if e.is_connection() {
                return Err(discard(&mut conn, e));
            }
            return Err(SandboxError::Connection(format!(
                "could not start validation transaction: {}",
                e
            )));
        }

        let mut verdict = ValidationResult::valid(method);
        for statement in statements {
            let kind = statement.kind();
            // Running COMMIT or ROLLBACK would end the guard transaction.
            let checked = if kind == StatementKind::TransactionControl {
                conn.parse_only(&statement.text).await
            } else {
                conn.execute(&statement.text, kind, 0).await.map(|_| ())
            };

            match checked {
                Ok(()) => {}
                Err(e) if e.is_connection() => {
                    if let Err(e) = conn.rollback().await {
                        debug!(error = %e, "rollback after connection failure failed");
                    }
                    return Err(discard(&mut conn, e));
                }
                Err(e) => {
                    debug!(ordinal = statement.ordinal, error = %e, "statement failed validation");
                    verdict = ValidationResult::invalid(e.message, Some(statement.ordinal), method);
                    break;
                }
            }
        }

        if !conn.in_transaction() {
            warn!("validation transaction ended early");
        }
        if let Err(e) = conn.rollback().await {
            error!(error = %e, "validation rollback failed, discarding connection");
            conn.mark_broken();
            return Err(SandboxError::Connection(format!(
                "validation rollback failed: {}",
                e
            )));
        }
        Ok(verdict)
    }
}

fn discard(conn: &mut PooledConnection<'_>, err: BackendError) -> SandboxError {
    warn!(error = %err, "connection failed during validation");
    conn.mark_broken();
    SandboxError::Connection(err.message)
}

fn dialect_for(backend: &str) -> Box<dyn Dialect> {
    match backend {
        "sqlite" => Box::new(SQLiteDialect {}),
        "postgres" => Box::new(PostgreSqlDialect {}),
        _ => Box::new(GenericDialect {}),
    }
}

/// Validates statements with a local SQL parser. Catches syntax errors
/// only; names are not resolved.
pub fn validate_locally(statements: &[Statement], backend: &str) -> ValidationResult {
    let method = ValidationMethod::LocalSyntax;
    if statements.is_empty() {
        return ValidationResult::invalid(EMPTY_QUERY, None, method);
    }

    let dialect = dialect_for(backend);
    for statement in statements {
        if let Err(e) = Parser::parse_sql(dialect.as_ref(), &statement.text) {
            return ValidationResult::invalid(e.to_string(), Some(statement.ordinal), method);
        }
    }
    ValidationResult::valid(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{flaky_pool_with, sqlite_pool};
    use sandbox_sql::split_statements;

    #[tokio::test]
    async fn test_empty_query_invalid() {
        let fixture = sqlite_pool();
        let validator = QueryValidator::new(fixture.pool.clone());

        let result = validator.validate("  -- only a comment\n").await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some(EMPTY_QUERY));
        assert_eq!(fixture.pool.stats().acquisitions, 0);
    }

    #[tokio::test]
    async fn test_single_statement_parse_only() {
        let fixture = sqlite_pool();
        let validator = QueryValidator::new(fixture.pool.clone());

        let ok = validator.validate("SELECT 1").await.unwrap();
        assert!(ok.valid);
        assert_eq!(ok.method, ValidationMethod::ParseOnly);

        let bad = validator.validate("SELEC 1").await.unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.ordinal, Some(1));
        assert!(bad.error.unwrap().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_script_validated_in_rolled_back_transaction() {
        let fixture = sqlite_pool();
        let validator = QueryValidator::new(fixture.pool.clone());

        let result = validator
            .validate("CREATE TABLE v (id INT); INSERT INTO v VALUES (1); SELECT id FROM v;")
            .await
            .unwrap();

        assert!(result.valid, "{:?}", result.error);
        assert_eq!(result.method, ValidationMethod::RolledBackTransaction);
        assert!(!fixture.table_exists("v").await);
    }

    #[tokio::test]
    async fn test_script_reports_offending_ordinal() {
        let fixture = sqlite_pool();
        let validator = QueryValidator::new(fixture.pool.clone());

        let result = validator
            .validate("CREATE TABLE v (id INT); INSERT INTO missing VALUES (1);")
            .await
            .unwrap();

        assert!(!result.valid);
        assert_eq!(result.ordinal, Some(2));
        assert!(result.error.unwrap().contains("no such table"));
        assert!(!fixture.table_exists("v").await);
    }

    #[tokio::test]
    async fn test_validation_leaves_rows_untouched() {
        let fixture = sqlite_pool();
        fixture.run("CREATE TABLE t (id INT); INSERT INTO t VALUES (1);").await;
        let validator = QueryValidator::new(fixture.pool.clone());

        let result = validator
            .validate("DELETE FROM t; INSERT INTO t VALUES (2); DROP TABLE t;")
            .await
            .unwrap();

        assert!(result.valid);
        assert_eq!(fixture.count("t").await, 1);
    }

    #[tokio::test]
    async fn test_transaction_control_is_not_executed() {
        let fixture = sqlite_pool();
        fixture.run("CREATE TABLE t (id INT)").await;
        let validator = QueryValidator::new(fixture.pool.clone());

        let result = validator
            .validate("INSERT INTO t VALUES (1); COMMIT; INSERT INTO t VALUES (2);")
            .await
            .unwrap();

        assert!(result.valid, "{:?}", result.error);
        assert_eq!(fixture.count("t").await, 0);
    }

    #[tokio::test]
    async fn test_rollback_failure_discards_connection() {
        let pool = flaky_pool_with(BackendCapabilities {
            parse_only: false,
            transactional_ddl: true,
        });
        let validator = QueryValidator::new(pool.clone());

        let err = validator
            .validate("SELECT 1; FAIL_ROLLBACK;")
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Connection(ref m) if m.contains("rollback")));
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_parse_only_per_statement() {
        let pool = flaky_pool_with(BackendCapabilities {
            parse_only: true,
            transactional_ddl: false,
        });
        let validator = QueryValidator::new(pool);

        let result = validator.validate("SELECT 1; BAD STATEMENT;").await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.method, ValidationMethod::ParseOnly);
        assert_eq!(result.ordinal, Some(2));
    }

    #[tokio::test]
    async fn test_local_fallback_without_capabilities() {
        let pool = flaky_pool_with(BackendCapabilities::default());
        let validator = QueryValidator::new(pool.clone());

        let ok = validator.validate("SELECT a FROM t WHERE b = 1").await.unwrap();
        assert!(ok.valid);
        assert_eq!(ok.method, ValidationMethod::LocalSyntax);

        let bad = validator.validate("SELECT 1; SELEC 2;").await.unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.ordinal, Some(2));
        assert_eq!(pool.stats().acquisitions, 0);
    }

    #[test]
    fn test_validate_locally() {
        let stmts = split_statements("CREATE TABLE t (id INT); INSERT INTO t VALUES (1)");
        assert!(validate_locally(&stmts, "sqlite").valid);

        let stmts = split_statements("CREATE TABLE (id INT)");
        assert!(!validate_locally(&stmts, "generic").valid);
    }
}
