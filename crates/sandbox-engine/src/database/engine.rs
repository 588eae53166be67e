//! The sandbox facade.

use std::sync::Arc;

use tracing::info;

use sandbox_client::{Backend, BackendCapabilities, ConnectionPool, PoolStats};
use sandbox_sql::{Statement, StatementSplitter};

use super::coordinator::ExecutionCoordinator;
use super::error::SandboxResult;
use super::result::{ExecutionMode, ExecutionResult, ValidationResult};
use super::validator::{validate_locally, QueryValidator};
use crate::config::SandboxConfig;

/// The SQL sandbox.
///
/// Owns the connection pool. The pool opens its connections on first use;
/// call [`Sandbox::initialize`] to open them up front and
/// [`Sandbox::shutdown`] to close them.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    pool: Arc<ConnectionPool>,
    coordinator: ExecutionCoordinator,
    validator: QueryValidator,
}

impl Sandbox {
    /// Builds a sandbox from configuration.
    pub fn from_config(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        let backend = sandbox_client::from_config(&config.backend_config())?;
        Self::with_backend(backend, config)
    }

    /// Builds a sandbox over an existing backend.
    pub fn with_backend(backend: Arc<dyn Backend>, config: SandboxConfig) -> SandboxResult<Self> {
        let split = config.split_options(backend.split_options());
        let pool = Arc::new(ConnectionPool::new(backend.clone(), config.pool_config())?);

        let coordinator = ExecutionCoordinator::new(pool.clone())
            .split_options(split.clone())
            .max_rows(config.max_rows)
            .max_token_len(config.max_token_len);
        let validator = QueryValidator::new(pool.clone()).splitter(StatementSplitter::new(split));

        info!(
            backend = backend.name(),
            pool_max = config.pool_max,
            "sandbox created"
        );
        Ok(Self {
            config,
            pool,
            coordinator,
            validator,
        })
    }

    /// Opens the pool's minimum connections.
    pub async fn initialize(&self) -> SandboxResult<()> {
        self.pool.initialize().await?;
        Ok(())
    }

    /// Executes a script, optionally inside a session namespace.
    pub async fn execute_script(
        &self,
        script: &str,
        session: Option<&str>,
        mode: ExecutionMode,
    ) -> SandboxResult<ExecutionResult> {
        self.coordinator.execute(script, session, mode).await
    }

    /// Validates a query without side effects.
    pub async fn validate_query(&self, query: &str) -> SandboxResult<ValidationResult> {
        self.validator.validate(query).await
    }

    /// Checks query syntax locally, without touching the database.
    pub fn check_syntax(&self, query: &str) -> ValidationResult {
        validate_locally(&self.split_statements(query), self.backend_name())
    }

    /// Splits a script with this backend's rules.
    pub fn split_statements(&self, script: &str) -> Vec<Statement> {
        self.coordinator.splitter().split(script)
    }

    /// Rewrites one statement into a session namespace.
    pub fn namespace_statement(&self, sql: &str, session: &str) -> SandboxResult<String> {
        let session = self.coordinator.session(session)?;
        Ok(session.namespacer(self.coordinator.namespace()).rewrite(sql))
    }

    /// Returns the backend name.
    pub fn backend_name(&self) -> &'static str {
        self.pool.backend().name()
    }

    /// Returns the backend capabilities.
    pub fn capabilities(&self) -> BackendCapabilities {
        self.pool.backend().capabilities()
    }

    /// Returns pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Closes the pool. Later calls fail with a pool error.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        info!(backend = self.backend_name(), "sandbox shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::sqlite_pool;
    use crate::database::{SandboxError, ValidationMethod};

    fn sandbox_at(path: &str) -> Sandbox {
        let config = SandboxConfig::builder()
            .database_url(path)
            .pool_size(1, 4)
            .build();
        Sandbox::from_config(config).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sandbox_execute_and_validate() {
        let fixture = sqlite_pool();
        let sandbox = sandbox_at(&fixture.path);
        assert_eq!(sandbox.backend_name(), "sqlite");

        let result = sandbox
            .execute_script(
                "CREATE TABLE employees (id INT, name TEXT);\nINSERT INTO employees VALUES (1, 'ann');",
                Some("alice_1"),
                ExecutionMode::Setup,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(fixture.table_exists("alice_1_employees").await);

        let check = sandbox
            .validate_query("SELECT name FROM alice_1_employees")
            .await
            .unwrap();
        assert!(check.valid);
        assert_eq!(check.method, ValidationMethod::ParseOnly);
    }

    #[tokio::test]
    async fn test_sandbox_split_and_namespace() {
        let fixture = sqlite_pool();
        let sandbox = sandbox_at(&fixture.path);

        let statements = sandbox.split_statements("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(statements.len(), 3);

        let rewritten = sandbox
            .namespace_statement("INSERT INTO t SELECT * FROM s", "bob-1")
            .unwrap();
        assert_eq!(rewritten, "INSERT INTO bob1_t SELECT * FROM bob1_s");

        let err = sandbox.namespace_statement("SELECT 1", "@@@").unwrap_err();
        assert!(matches!(err, SandboxError::NamespaceSanitization(_)));
    }

    #[tokio::test]
    async fn test_sandbox_check_syntax() {
        let fixture = sqlite_pool();
        let sandbox = sandbox_at(&fixture.path);

        assert!(sandbox.check_syntax("SELECT a FROM b").valid);
        let bad = sandbox.check_syntax("SELECT a FROM");
        assert!(!bad.valid);
        assert_eq!(bad.method, ValidationMethod::LocalSyntax);
    }

    #[tokio::test]
    async fn test_sandbox_shutdown() {
        let fixture = sqlite_pool();
        let sandbox = sandbox_at(&fixture.path);
        sandbox.initialize().await.unwrap();
        assert_eq!(sandbox.pool_stats().current_size, 1);

        sandbox.shutdown().await;
        let err = sandbox
            .execute_script("SELECT 1", None, ExecutionMode::Adhoc)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Pool(_)));
    }

    #[tokio::test]
    async fn test_sandbox_init_failure() {
        let config = SandboxConfig::builder()
            .database_url("/nonexistent-dir/deeper/sandbox.db")
            .build();
        let sandbox = Sandbox::from_config(config).unwrap();

        let err = sandbox.initialize().await.unwrap_err();
        assert!(matches!(err, SandboxError::PoolInitialization(_)));

        let err = sandbox
            .execute_script("SELECT 1", None, ExecutionMode::Adhoc)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::PoolInitialization(_)));
    }

    #[test]
    fn test_sandbox_rejects_invalid_config() {
        let config = SandboxConfig::builder().pool_size(3, 1).build();
        assert!(matches!(
            Sandbox::from_config(config),
            Err(SandboxError::Config(_))
        ));
    }
}
