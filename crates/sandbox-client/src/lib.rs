//! # sandbox-client
//!
//! Database access for the SQL sandbox.
//!
//! This crate is the only part of the sandbox that talks to a database. It
//! provides:
//!
//! - **Backend adapters**: one [`Backend`] trait with a SQLite adapter and an
//!   optional PostgreSQL adapter (`postgres` feature)
//! - **Connection Pooling**: a bounded, lazily initialized pool that lends
//!   connections through an RAII guard
//!
//! ## Connection Pooling
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sandbox_client::{ConnectionPool, PoolConfig, SqliteBackend};
//! use sandbox_sql::StatementKind;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(SqliteBackend::new("sandbox.db"));
//!     let config = PoolConfig::new()
//!         .min_connections(2)
//!         .max_connections(8);
//!
//!     let pool = ConnectionPool::new(backend, config)?;
//!
//!     // The first acquire opens the minimum connections.
//!     let mut conn = pool.acquire().await?;
//!     conn.execute("SELECT 1", StatementKind::Query, 10).await?;
//!
//!     // Connection is returned to pool when dropped
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Backend adapters.
pub mod backend;

/// Connection pool.
pub mod pool;

// Re-exports
#[cfg(feature = "postgres")]
pub use backend::PostgresBackend;
pub use backend::{
    from_config, Backend, BackendCapabilities, BackendConfig, BackendConnection, BackendKind,
    QueryResult, SqliteBackend, Value,
};
pub use error::{BackendError, BackendErrorKind, BackendResult, ClientError, ClientResult};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
