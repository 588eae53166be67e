//! PostgreSQL adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use sandbox_sql::{SplitOptions, StatementKind};

use super::{Backend, BackendCapabilities, BackendConfig, BackendConnection, QueryResult, Value};
use crate::error::{BackendError, BackendResult};

/// PostgreSQL backend.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    connection_string: String,
    connect_timeout: Duration,
}

impl PostgresBackend {
    /// Creates a backend for a connection string or URL.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Creates a backend from configuration.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            connection_string: config.connection_string(),
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            parse_only: true,
            transactional_ddl: true,
        }
    }

    fn split_options(&self) -> SplitOptions {
        SplitOptions::postgres()
    }

    async fn connect(&self) -> BackendResult<Box<dyn BackendConnection>> {
        let connect = tokio_postgres::connect(&self.connection_string, NoTls);
        let (client, connection) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                BackendError::connection(format!(
                    "connection timeout after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| BackendError::connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection ended with error");
            }
        });

        debug!("opened postgres connection");
        Ok(Box::new(PostgresConnection {
            client,
            in_transaction: false,
            broken: false,
        }))
    }
}

/// A connection to a PostgreSQL server.
pub struct PostgresConnection {
    client: Client,
    in_transaction: bool,
    broken: bool,
}

impl PostgresConnection {
    fn observe<T>(&mut self, result: BackendResult<T>) -> BackendResult<T> {
        if matches!(&result, Err(e) if e.is_connection()) {
            self.broken = true;
        }
        result
    }

    async fn batch(&mut self, sql: &str) -> BackendResult<()> {
        let result = self
            .client
            .simple_query(sql)
            .await
            .map(|_| ())
            .map_err(map_error);
        self.observe(result)
    }
}

#[async_trait]
impl BackendConnection for PostgresConnection {
    async fn execute(
        &mut self,
        sql: &str,
        kind: StatementKind,
        max_rows: usize,
    ) -> BackendResult<QueryResult> {
        let start = Instant::now();
        let messages = match self.client.simple_query(sql).await {
            Ok(messages) => messages,
            Err(e) => return self.observe(Err(map_error(e))),
        };

        let mut result = QueryResult::default();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    result.columns = columns.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    if result.rows.len() >= max_rows {
                        result.truncated = true;
                        continue;
                    }
                    let values = (0..row.len())
                        .map(|i| row.get(i).map_or(Value::Null, |s| Value::String(s.to_string())))
                        .collect();
                    result.rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(count) => {
                    if kind.reports_rows_affected() {
                        result.rows_affected = Some(count);
                    }
                }
                _ => {}
            }
        }

        if kind == StatementKind::TransactionControl {
            self.in_transaction = transaction_state_after(sql, self.in_transaction);
        }
        result.execution_time = start.elapsed();
        Ok(result)
    }

    async fn begin(&mut self) -> BackendResult<()> {
        self.batch("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> BackendResult<()> {
        self.batch("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> BackendResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.batch("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn parse_only(&mut self, sql: &str) -> BackendResult<()> {
        let result = self.client.prepare(sql).await.map(|_| ()).map_err(map_error);
        self.observe(result)
    }

    async fn ping(&mut self) -> BackendResult<()> {
        self.batch("SELECT 1").await
    }

    fn is_connected(&self) -> bool {
        !self.broken && !self.client.is_closed()
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

/// Whether a transaction is open after a transaction-control statement.
fn transaction_state_after(sql: &str, open: bool) -> bool {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(2)
        .map(|w| w.trim_end_matches(';').to_ascii_uppercase())
        .collect();
    let second = words.get(1).map(String::as_str);
    match words.first().map(String::as_str) {
        Some("BEGIN" | "START") => true,
        Some("ROLLBACK" | "ABORT") if second == Some("TO") => open,
        Some("COMMIT" | "END" | "ROLLBACK" | "ABORT") => false,
        _ => open,
    }
}

fn map_error(err: tokio_postgres::Error) -> BackendError {
    match err.as_db_error() {
        Some(db) => BackendError::statement(db.message()).with_code(db.code().code()),
        None => BackendError::connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state_tracking() {
        assert!(transaction_state_after("BEGIN", false));
        assert!(transaction_state_after("start transaction", false));
        assert!(!transaction_state_after("COMMIT", true));
        assert!(!transaction_state_after("ROLLBACK;", true));
        assert!(transaction_state_after("ROLLBACK TO SAVEPOINT a", true));
        assert!(transaction_state_after("SAVEPOINT a", true));
    }

    #[test]
    fn test_postgres_backend_from_config() {
        let config = BackendConfig::postgres("postgres://localhost/sandbox");
        let backend = PostgresBackend::from_config(&config);
        assert_eq!(backend.name(), "postgres");
        assert!(backend.split_options().dollar_quotes);
    }
}
