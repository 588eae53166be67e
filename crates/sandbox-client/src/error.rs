//! Error types for the client library.

use std::fmt;
use thiserror::Error;

/// Whether a backend failure concerns one statement or the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The statement was rejected; the connection is still usable.
    Statement,
    /// The connection failed and must not be reused.
    Connection,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Statement => write!(f, "statement"),
            BackendErrorKind::Connection => write!(f, "connection"),
        }
    }
}

/// An error reported by a database backend.
///
/// The message is the backend's own text and is shown to users as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Failure scope.
    pub kind: BackendErrorKind,
    /// Backend-specific error code (SQLSTATE, SQLite extended code, ...).
    pub code: Option<String>,
    /// Backend error message.
    pub message: String,
}

impl BackendError {
    /// Creates a statement-level error.
    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Statement,
            code: None,
            message: message.into(),
        }
    }

    /// Creates a connection-level error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Connection,
            code: None,
            message: message.into(),
        }
    }

    /// Sets the error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Returns true if the connection must be discarded.
    pub fn is_connection(&self) -> bool {
        self.kind == BackendErrorKind::Connection
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The pool could not open its initial connections.
    #[error("pool initialization failed: {0}")]
    Initialization(String),

    /// Pool timeout.
    #[error("pool acquisition timeout after {0}ms")]
    PoolTimeout(u64),

    /// The pool has been closed.
    #[error("connection pool closed")]
    PoolClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend error.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
