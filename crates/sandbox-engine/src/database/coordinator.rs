//! Script execution.
//!
//! The coordinator borrows one connection per call and drives every statement
//! of a script through it, in split order. Two modes exist:
//!
//! - **Adhoc**: statements run independently in auto-commit; a failure is
//!   recorded and the rest of the script still runs.
//! - **Setup**: statements run inside one transaction; the first failure
//!   stops the script, the remaining statements are reported as skipped and
//!   the transaction is rolled back.
//!
//! A connection-level failure aborts either mode with
//! [`SandboxError::Connection`]; the connection is then discarded by the pool.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use sandbox_client::{BackendCapabilities, BackendError, ConnectionPool, PooledConnection};
use sandbox_sql::{
    NamespaceOptions, SessionToken, SplitOptions, Statement, StatementKind, StatementSplitter,
};

use super::error::{SandboxError, SandboxResult};
use super::result::{ExecutionMode, ExecutionResult, StatementOutcome};
use super::session::Session;

/// Default row limit for query results.
pub const DEFAULT_MAX_ROWS: usize = 1000;

const TRANSACTION_CONTROL_REFUSED: &str =
    "transaction control statements are not allowed in setup scripts";

const OPEN_TRANSACTION_ROLLED_BACK: &str =
    "script left a transaction open; its uncommitted changes were rolled back";

/// Statements of one call, run against one connection.
struct Run {
    statements: Vec<StatementOutcome>,
    rolled_back: bool,
    error: Option<String>,
}

/// Executes scripts against a connection pool.
#[derive(Debug)]
pub struct ExecutionCoordinator {
    pool: Arc<ConnectionPool>,
    splitter: StatementSplitter,
    namespace: NamespaceOptions,
    capabilities: BackendCapabilities,
    max_rows: usize,
    max_token_len: usize,
}

impl ExecutionCoordinator {
    /// Creates a coordinator using the pool's backend defaults.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let backend = pool.backend();
        let split = backend.split_options();
        let capabilities = backend.capabilities();
        Self {
            namespace: NamespaceOptions::default().lex_options(split.lex_options()),
            splitter: StatementSplitter::new(split),
            capabilities,
            pool,
            max_rows: DEFAULT_MAX_ROWS,
            max_token_len: SessionToken::DEFAULT_MAX_LEN,
        }
    }

    /// Overrides the split options.
    pub fn split_options(mut self, options: SplitOptions) -> Self {
        self.namespace.lex = options.lex_options();
        self.splitter = StatementSplitter::new(options);
        self
    }

    /// Overrides the namespace options. The lexer options stay tied to the
    /// split options.
    pub fn namespace_options(mut self, options: NamespaceOptions) -> Self {
        let lex = self.splitter.options().lex_options();
        self.namespace = options.lex_options(lex);
        self
    }

    /// Sets the row limit for query results.
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Sets the maximum session token length.
    pub fn max_token_len(mut self, max_token_len: usize) -> Self {
        self.max_token_len = max_token_len;
        self
    }

    /// Returns the splitter.
    pub fn splitter(&self) -> &StatementSplitter {
        &self.splitter
    }

    /// Returns the namespace options.
    pub fn namespace(&self) -> &NamespaceOptions {
        &self.namespace
    }

    /// Sanitizes a raw session identifier.
    pub fn session(&self, raw: &str) -> SandboxResult<Session> {
        Session::new(raw, self.max_token_len)
    }

    /// Splits a script and namespaces it for a session.
    pub fn prepare(&self, script: &str, session: Option<&Session>) -> Vec<Statement> {
        let statements = self.splitter.split(script);
        match session {
            Some(session) => session.namespacer(&self.namespace).rewrite_all(&statements),
            None => statements,
        }
    }

    /// Executes a script.
    pub async fn execute(
        &self,
        script: &str,
        session: Option<&str>,
        mode: ExecutionMode,
    ) -> SandboxResult<ExecutionResult> {
        let start = Instant::now();
        let session = session.map(|raw| self.session(raw)).transpose()?;
        let session_token = session.as_ref().map(|s| s.token().to_string());
        let statements = self.prepare(script, session.as_ref());

        if statements.is_empty() {
            debug!(mode = %mode, "empty script");
            let mut result = ExecutionResult::empty(mode, session_token);
            result.execution_time = start.elapsed();
            return Ok(result);
        }

        debug!(
            mode = %mode,
            session = session_token.as_deref().unwrap_or("-"),
            statements = statements.len(),
            "executing script"
        );

        let mut conn = self.pool.acquire().await?;
        let run = match mode {
            ExecutionMode::Adhoc => self.run_adhoc(&mut conn, &statements).await?,
            ExecutionMode::Setup => self.run_setup(&mut conn, &statements).await?,
        };
        drop(conn);

        let all_succeeded = run.statements.iter().all(StatementOutcome::is_success);
        let success = all_succeeded
            && run.error.is_none()
            && (mode == ExecutionMode::Adhoc || !run.rolled_back);

        let result = ExecutionResult {
            success,
            mode,
            session_token,
            statements: run.statements,
            rolled_back: run.rolled_back,
            error: run.error,
            execution_time: start.elapsed(),
        };
        info!(
            mode = %mode,
            success,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "{}",
            result.summary()
        );
        Ok(result)
    }

    async fn run_adhoc(
        &self,
        conn: &mut PooledConnection<'_>,
        statements: &[Statement],
    ) -> SandboxResult<Run> {
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            let outcome = match self.execute_one(conn, statement).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(abort(conn, e).await),
            };
            outcomes.push(outcome);
        }

        let mut rolled_back = false;
        let mut error = None;
        if conn.in_transaction() {
            warn!("script left a transaction open, rolling back");
            match conn.rollback().await {
                Ok(()) => {
                    rolled_back = true;
                    error = Some(OPEN_TRANSACTION_ROLLED_BACK.to_string());
                }
                Err(e) => {
                    error!(error = %e, "rollback of open transaction failed");
                    conn.mark_broken();
                    error = Some(format!("rollback of open transaction failed: {}", e));
                }
            }
        }

        Ok(Run {
            statements: outcomes,
            rolled_back,
            error,
        })
    }

    async fn run_setup(
        &self,
        conn: &mut PooledConnection<'_>,
        statements: &[Statement],
    ) -> SandboxResult<Run> {
        if let Err(e) = conn.begin().await {
            if e.is_connection() {
                return Err(abort(conn, e).await);
            }
            warn!(error = %e, "could not start setup transaction");
            return Ok(Run {
                statements: statements.iter().map(StatementOutcome::skipped).collect(),
                rolled_back: false,
                error: Some(format!("could not start transaction: {}", e)),
            });
        }

        let mut outcomes = Vec::with_capacity(statements.len());
        let mut failed = false;
        for statement in statements {
            if failed {
                outcomes.push(StatementOutcome::skipped(statement));
                continue;
            }

            let kind = statement.kind();
            let outcome = if kind == StatementKind::TransactionControl {
                warn!(ordinal = statement.ordinal, "transaction control in setup script");
                StatementOutcome::failed(
                    statement,
                    kind,
                    None,
                    TRANSACTION_CONTROL_REFUSED,
                    Default::default(),
                )
            } else {
                match self.execute_one(conn, statement).await {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(abort(conn, e).await),
                }
            };
            failed = !outcome.is_success();
            outcomes.push(outcome);
        }

        if !failed {
            return match conn.commit().await {
                Ok(()) => Ok(Run {
                    statements: outcomes,
                    rolled_back: false,
                    error: None,
                }),
                Err(e) if e.is_connection() => Err(abort(conn, e).await),
                Err(e) => {
                    warn!(error = %e, "commit failed, rolling back");
                    let rolled_back = rollback(conn).await.is_ok();
                    Ok(Run {
                        statements: outcomes,
                        rolled_back,
                        error: Some(format!("commit failed: {}", e)),
                    })
                }
            };
        }

        let mut error = None;
        let rolled_back = match rollback(conn).await {
            Ok(()) => true,
            Err(e) => {
                error = Some(format!("rollback failed: {}", e));
                false
            }
        };

        let ran_ddl = outcomes
            .iter()
            .any(|o| o.is_success() && o.kind == StatementKind::Ddl);
        if rolled_back && ran_ddl && !self.capabilities.transactional_ddl {
            warn!("setup script rolled back, but this backend cannot undo DDL");
        }

        Ok(Run {
            statements: outcomes,
            rolled_back,
            error,
        })
    }

    /// Runs one statement. Statement-level failures become a failed
    /// outcome; connection-level failures are returned.
    async fn execute_one(
        &self,
        conn: &mut PooledConnection<'_>,
        statement: &Statement,
    ) -> Result<StatementOutcome, BackendError> {
        let kind = statement.kind();
        let start = Instant::now();
        debug!(ordinal = statement.ordinal, kind = %kind, "executing statement");

        match conn.execute(&statement.text, kind, self.max_rows).await {
            Ok(result) => Ok(StatementOutcome::succeeded(statement, kind, result)),
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                warn!(ordinal = statement.ordinal, error = %e, "statement failed");
                Ok(StatementOutcome::failed(
                    statement,
                    kind,
                    e.code,
                    e.message,
                    start.elapsed(),
                ))
            }
        }
    }
}

async fn rollback(conn: &mut PooledConnection<'_>) -> Result<(), BackendError> {
    match conn.rollback().await {
        Ok(()) => {
            debug!("transaction rolled back");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "rollback failed, discarding connection");
            conn.mark_broken();
            Err(e)
        }
    }
}

/// Best-effort rollback after a connection failure.
async fn abort(conn: &mut PooledConnection<'_>, err: BackendError) -> SandboxError {
    warn!(error = %err, "connection failed, aborting script");
    if let Err(e) = conn.rollback().await {
        debug!(error = %e, "rollback after connection failure failed");
    }
    conn.mark_broken();
    SandboxError::Connection(err.message)
}
