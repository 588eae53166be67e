//! SQLite adapter.
//!
//! All sessions share one database file. Every call into rusqlite blocks, so
//! it runs on the blocking thread pool; the connection lives behind an
//! `Arc<Mutex<_>>` so the closure can own a handle to it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, warn};

use sandbox_sql::{SplitOptions, StatementKind};

use super::{Backend, BackendCapabilities, BackendConfig, BackendConnection, QueryResult, Value};
use crate::error::{BackendError, BackendErrorKind, BackendResult};

/// SQLite backend over a shared database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: String,
    busy_timeout: Duration,
}

impl SqliteBackend {
    /// Creates a backend for the database at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Creates a backend from configuration.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            path: config.url.clone(),
            busy_timeout: config.busy_timeout,
        }
    }

    /// Sets the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Returns the database path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            parse_only: true,
            transactional_ddl: true,
        }
    }

    fn split_options(&self) -> SplitOptions {
        SplitOptions::sqlite()
    }

    async fn connect(&self) -> BackendResult<Box<dyn BackendConnection>> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || open(&path, busy_timeout))
            .await
            .map_err(|e| BackendError::connection(format!("open task failed: {}", e)))??;

        debug!(path = %self.path, "opened sqlite connection");
        Ok(Box::new(SqliteConnection::new(conn)))
    }
}

fn open(path: &str, busy_timeout: Duration) -> BackendResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags).map_err(connection_error)?;
    conn.busy_timeout(busy_timeout).map_err(connection_error)?;

    if path == ":memory:" {
        warn!("in-memory sqlite database is private to each connection");
    } else {
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(connection_error)?;
        debug!(journal_mode = %mode, "sqlite journal mode");
    }
    Ok(conn)
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    broken: bool,
}

impl SqliteConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            broken: false,
        }
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run<T, F>(&mut self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&mut Connection) -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| BackendError::connection(format!("sqlite task failed: {}", e)))
        .and_then(|r| r);

        if matches!(&result, Err(e) if e.is_connection()) {
            self.broken = true;
        }
        result
    }
}

#[async_trait]
impl BackendConnection for SqliteConnection {
    async fn execute(
        &mut self,
        sql: &str,
        kind: StatementKind,
        max_rows: usize,
    ) -> BackendResult<QueryResult> {
        let sql = sql.to_string();
        self.run(move |conn| execute_blocking(conn, &sql, kind, max_rows))
            .await
    }

    async fn begin(&mut self) -> BackendResult<()> {
        self.run(|conn| conn.execute_batch("BEGIN IMMEDIATE").map_err(map_error))
            .await
    }

    async fn commit(&mut self) -> BackendResult<()> {
        self.run(|conn| conn.execute_batch("COMMIT").map_err(map_error))
            .await
    }

    async fn rollback(&mut self) -> BackendResult<()> {
        self.run(|conn| {
            if conn.is_autocommit() {
                return Ok(());
            }
            conn.execute_batch("ROLLBACK").map_err(map_error)
        })
        .await
    }

    async fn parse_only(&mut self, sql: &str) -> BackendResult<()> {
        let sql = sql.to_string();
        self.run(move |conn| conn.prepare(&sql).map(|_| ()).map_err(map_error))
            .await
    }

    async fn ping(&mut self) -> BackendResult<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(map_error)
        })
        .await
    }

    fn is_connected(&self) -> bool {
        !self.broken
    }

    fn in_transaction(&self) -> bool {
        // Locked means a blocking call is still running; treat it as busy.
        self.conn
            .try_lock()
            .map_or(true, |conn| !conn.is_autocommit())
    }
}

fn execute_blocking(
    conn: &mut Connection,
    sql: &str,
    kind: StatementKind,
    max_rows: usize,
) -> BackendResult<QueryResult> {
    let start = Instant::now();
    let mut stmt = conn.prepare(sql).map_err(map_error)?;

    if stmt.column_count() == 0 {
        let changed = stmt.execute([]).map_err(map_error)?;
        return Ok(QueryResult {
            rows_affected: kind.reports_rows_affected().then_some(changed as u64),
            execution_time: start.elapsed(),
            ..QueryResult::default()
        });
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut truncated = false;

    let mut cursor = stmt.query([]).map_err(map_error)?;
    while let Some(row) = cursor.next().map_err(map_error)? {
        if rows.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_value(row.get_ref(i).map_err(map_error)?));
        }
        rows.push(values);
    }

    Ok(QueryResult {
        columns,
        rows,
        rows_affected: None,
        truncated,
        execution_time: start.elapsed(),
    })
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn map_error(err: rusqlite::Error) -> BackendError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let kind = match failure.code {
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt => BackendErrorKind::Connection,
                _ => BackendErrorKind::Statement,
            };
            BackendError {
                kind,
                code: Some(failure.extended_code.to_string()),
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            }
        }
        _ => BackendError::statement(err.to_string()),
    }
}

fn connection_error(err: rusqlite::Error) -> BackendError {
    BackendError {
        kind: BackendErrorKind::Connection,
        ..map_error(err)
    }
}
