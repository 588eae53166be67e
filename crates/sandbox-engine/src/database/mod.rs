//! Sandbox database layer.
//!
//! This module wires the SQL text tools and the connection pool into the
//! operations the rest of the system uses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Sandbox                              │
//! │  ┌──────────────────────────┐   ┌───────────────────────────┐   │
//! │  │   ExecutionCoordinator   │   │      QueryValidator       │   │
//! │  │  split → namespace → run │   │  parse-only / rolled-back │   │
//! │  │   (adhoc or setup mode)  │   │       transaction         │   │
//! │  └────────────┬─────────────┘   └─────────────┬─────────────┘   │
//! │               └───────────────┬───────────────┘                 │
//! │                               ▼                                 │
//! │                ┌─────────────────────────────┐                  │
//! │                │       ConnectionPool        │                  │
//! │                └──────────────┬──────────────┘                  │
//! └───────────────────────────────┼─────────────────────────────────┘
//!                                 ▼
//!                     Backend (SQLite / PostgreSQL)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sandbox_engine::{ExecutionMode, Sandbox, SandboxConfig};
//!
//! let sandbox = Sandbox::from_config(SandboxConfig::default())?;
//!
//! let result = sandbox
//!     .execute_script(
//!         "CREATE TABLE employees (id INT); INSERT INTO employees VALUES (1);",
//!         Some("alice_1"),
//!         ExecutionMode::Setup,
//!     )
//!     .await?;
//! assert!(result.success);
//!
//! let check = sandbox.validate_query("SELECT * FROM alice_1_employees").await?;
//! assert!(check.valid);
//! ```

mod coordinator;
mod engine;
mod error;
mod result;
mod session;
mod validator;

pub use coordinator::{ExecutionCoordinator, DEFAULT_MAX_ROWS};
pub use engine::Sandbox;
pub use error::{SandboxError, SandboxResult};
pub use result::{
    ExecutionMode, ExecutionResult, StatementError, StatementOutcome, StatementStatus,
    ValidationMethod, ValidationResult,
};
pub use session::Session;
pub use validator::{validate_locally, QueryValidator, EMPTY_QUERY};
