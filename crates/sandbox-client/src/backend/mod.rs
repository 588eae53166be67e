//! Backend adapters.
//!
//! A [`Backend`] knows how to open connections to one kind of database and
//! describes what that database can do. A [`BackendConnection`] executes
//! statements. The engine only talks to these traits, so adding a database
//! means adding an adapter here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sandbox_sql::{SplitOptions, StatementKind};

use crate::error::{BackendResult, ClientError, ClientResult};

/// PostgreSQL adapter.
#[cfg(feature = "postgres")]
pub mod postgres;

/// SQLite adapter.
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

// ============================================================================
// Configuration
// ============================================================================

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            other => Err(ClientError::InvalidConfig(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Backend connection configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend kind.
    pub kind: BackendKind,
    /// SQLite file path or PostgreSQL connection URL.
    pub url: String,
    /// Server host (PostgreSQL, when no URL is given).
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Database name.
    pub database: Option<String>,
    /// How long SQLite waits on a locked database.
    pub busy_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Sqlite,
            url: "sandbox.db".to_string(),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            busy_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BackendConfig {
    /// Creates a configuration for the given backend kind.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            url: String::new(),
            ..Self::default()
        }
    }

    /// Creates a SQLite configuration for a database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(BackendKind::Sqlite).url(path)
    }

    /// Creates a PostgreSQL configuration from a connection URL.
    pub fn postgres(url: impl Into<String>) -> Self {
        Self::new(BackendKind::Postgres).url(url)
    }

    /// Sets the file path or connection URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the connection string.
    ///
    /// For PostgreSQL without a URL, builds a `key=value` string from the
    /// individual fields.
    pub fn connection_string(&self) -> String {
        if !self.url.is_empty() || self.kind == BackendKind::Sqlite {
            return self.url.clone();
        }

        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host={}", host));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        if let Some(user) = &self.username {
            parts.push(format!("user={}", user));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", password));
        }
        if let Some(database) = &self.database {
            parts.push(format!("dbname={}", database));
        }
        parts.join(" ")
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        match self.kind {
            BackendKind::Sqlite if self.url.trim().is_empty() => Err(ClientError::InvalidConfig(
                "sqlite backend requires a database path".to_string(),
            )),
            BackendKind::Postgres if self.url.is_empty() && self.host.is_none() => {
                Err(ClientError::InvalidConfig(
                    "postgres backend requires a url or a host".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Value types returned by backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Tries to get as integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Tries to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Row data.
    pub rows: Vec<Vec<Value>>,
    /// Number of rows affected, for statements where that is meaningful.
    pub rows_affected: Option<u64>,
    /// Whether rows were dropped to honor the row limit.
    pub truncated: bool,
    /// Execution time.
    pub execution_time: Duration,
}

impl QueryResult {
    /// Creates an empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a result with affected rows count.
    pub fn affected(count: u64, execution_time: Duration) -> Self {
        Self {
            rows_affected: Some(count),
            execution_time,
            ..Self::default()
        }
    }

    /// Returns true if the result has rows.
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Gets a single value from the first row.
    pub fn get_value(&self, column: usize) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get(column))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// What a backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BackendCapabilities {
    /// The backend can check a statement without executing it.
    pub parse_only: bool,
    /// DDL statements take part in transactions and can be rolled back.
    pub transactional_ddl: bool,
}

/// An open connection to a backend.
#[async_trait]
pub trait BackendConnection: Send {
    /// Executes one statement, returning at most `max_rows` rows.
    async fn execute(
        &mut self,
        sql: &str,
        kind: StatementKind,
        max_rows: usize,
    ) -> BackendResult<QueryResult>;

    /// Starts an explicit transaction.
    async fn begin(&mut self) -> BackendResult<()>;

    /// Commits the current transaction.
    async fn commit(&mut self) -> BackendResult<()>;

    /// Rolls back the current transaction. A no-op outside a transaction.
    async fn rollback(&mut self) -> BackendResult<()>;

    /// Checks a statement without executing it.
    async fn parse_only(&mut self, sql: &str) -> BackendResult<()>;

    /// Checks that the connection is alive.
    async fn ping(&mut self) -> BackendResult<()>;

    /// Returns false once the connection is known to be unusable.
    fn is_connected(&self) -> bool;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;
}

/// A database backend.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short backend name.
    fn name(&self) -> &'static str;

    /// Backend capabilities.
    fn capabilities(&self) -> BackendCapabilities;

    /// How scripts for this backend are split.
    fn split_options(&self) -> SplitOptions;

    /// Opens a new connection.
    async fn connect(&self) -> BackendResult<Box<dyn BackendConnection>>;
}

/// Builds the backend described by `config`.
pub fn from_config(config: &BackendConfig) -> ClientResult<Arc<dyn Backend>> {
    config.validate()?;
    match config.kind {
        BackendKind::Sqlite => Ok(Arc::new(SqliteBackend::from_config(config))),
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => Ok(Arc::new(PostgresBackend::from_config(config))),
        #[cfg(not(feature = "postgres"))]
        BackendKind::Postgres => Err(ClientError::InvalidConfig(
            "postgres support is not compiled in (enable the `postgres` feature)".to_string(),
        )),
    }
}
