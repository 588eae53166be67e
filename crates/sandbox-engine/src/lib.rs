//! # sandbox-engine
//!
//! Script execution and query validation for the SQL sandbox.
//!
//! This crate provides:
//!
//! - **Execution**: run free-form scripts statement by statement, either
//!   independently (adhoc) or all-or-nothing in one transaction (setup)
//! - **Session namespaces**: objects created under a session carry its token
//!   as a prefix, so sessions sharing one database never collide
//! - **Validation**: check a query without changing database state
//! - **Configuration**: TOML file plus `SANDBOX_*` environment overrides
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sandbox_engine::{ExecutionMode, Sandbox, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SandboxConfig::load(None)?;
//!     let sandbox = Sandbox::from_config(config)?;
//!
//!     let result = sandbox
//!         .execute_script(
//!             "CREATE TABLE t (id INT); INSERT INTO t VALUES (1); INSERT INTO bogus VALUES (1);",
//!             Some("alice_1"),
//!             ExecutionMode::Adhoc,
//!         )
//!         .await?;
//!
//!     for statement in &result.statements {
//!         println!("{} {}", statement.ordinal, statement.status);
//!     }
//!
//!     sandbox.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;

// Re-exports
pub use config::{SandboxConfig, SandboxConfigBuilder};
pub use database::{
    validate_locally, ExecutionCoordinator, ExecutionMode, ExecutionResult, QueryValidator,
    Sandbox, SandboxError, SandboxResult, Session, StatementError, StatementOutcome,
    StatementStatus, ValidationMethod, ValidationResult, DEFAULT_MAX_ROWS, EMPTY_QUERY,
};
pub use sandbox_client::{BackendKind, PoolStats};
pub use sandbox_sql::{Statement, StatementForm, StatementKind};
