//! # sandbox-sql
//!
//! SQL text handling for the SQL sandbox.
//!
//! This crate never talks to a database. It provides:
//!
//! - **Statement splitting**: turn a free-form script into discrete
//!   statements, honoring string literals, comments and procedural blocks
//! - **Session namespacing**: rewrite object names so that each session
//!   works in its own prefixed namespace
//! - **Classification**: coarse statement kinds (query, DML, DDL, ...)
//!
//! ## Quick Start
//!
//! ```rust
//! use sandbox_sql::{split_statements, SessionNamespacer, SessionToken};
//!
//! let statements = split_statements("CREATE TABLE t (id INT); INSERT INTO t VALUES (1);");
//! assert_eq!(statements.len(), 2);
//!
//! let token = SessionToken::sanitize("sess-1").unwrap();
//! let namespacer = SessionNamespacer::new(token);
//! assert_eq!(
//!     namespacer.rewrite(&statements[0].text),
//!     "CREATE TABLE sess1_t (id INT)"
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Statement classification.
pub mod classify;

/// SQL lexer.
pub mod lexer;

/// Session namespacing.
pub mod namespace;

/// Statement splitting.
pub mod splitter;

// Re-exports
pub use classify::{classify, is_blank, StatementKind};
pub use lexer::{LexOptions, Lexer, Token, TokenKind};
pub use namespace::{
    namespace_statement, NamespaceError, NamespaceOptions, NamespaceResult, SessionNamespacer,
    SessionToken,
};
pub use splitter::{split_statements, SplitOptions, Statement, StatementForm, StatementSplitter};
