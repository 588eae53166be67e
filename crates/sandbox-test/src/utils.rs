//! Throwaway SQLite databases.

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use sandbox_client::{Backend, BackendConnection, SqliteBackend, Value};
use sandbox_engine::{Sandbox, SandboxConfig, SandboxConfigBuilder};
use sandbox_sql::StatementKind;

/// A SQLite database file in a temporary directory, removed on drop.
pub struct TestDatabase {
    _dir: TempDir,
    path: String,
}

impl TestDatabase {
    /// Creates an empty database location.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sandbox.db").to_string_lossy().into_owned();
        Ok(Self { _dir: dir, path })
    }

    /// Returns the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a configuration pointing at this database.
    pub fn config(&self) -> SandboxConfig {
        self.builder().build()
    }

    /// Returns a configuration builder pointing at this database.
    pub fn builder(&self) -> SandboxConfigBuilder {
        SandboxConfig::builder().database_url(self.path.clone())
    }

    /// Builds a sandbox over this database.
    pub fn sandbox(&self) -> Result<Sandbox> {
        Ok(Sandbox::from_config(self.config())?)
    }

    async fn connect(&self) -> Result<Box<dyn BackendConnection>> {
        Ok(SqliteBackend::new(self.path.clone()).connect().await?)
    }

    /// Runs one query on a fresh connection, outside any sandbox.
    pub async fn query(&self, sql: &str) -> Result<Vec<Vec<Value>>> {
        let mut conn = self.connect().await?;
        Ok(conn.execute(sql, StatementKind::Query, usize::MAX).await?.rows)
    }

    /// Returns the names of all tables, sorted.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let rows = self
            .query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    /// Returns true if the table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables().await?.iter().any(|t| t == name))
    }

    /// Returns the number of rows in a table.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let rows = self.query(&format!("SELECT COUNT(*) FROM {}", table)).await?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("no count returned for {}", table))
    }
}
