//! Engine error types.
//!
//! Statement failures and validation failures are not errors here: they are
//! reported inside `ExecutionResult` and `ValidationResult`. A `SandboxError`
//! means the call itself could not be carried out.

use thiserror::Error;

use sandbox_client::ClientError;
use sandbox_sql::NamespaceError;

/// Sandbox engine errors.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The connection pool could not be initialized.
    #[error("connection pool initialization failed: {0}")]
    PoolInitialization(String),

    /// The session identifier could not be turned into a namespace token.
    #[error("invalid session identifier: {0}")]
    NamespaceSanitization(#[from] NamespaceError),

    /// A connection failed mid-call. The connection has been discarded.
    #[error("connection error: {0}")]
    Connection(String),

    /// No connection could be obtained (timeout or closed pool).
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ClientError> for SandboxError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Initialization(msg) => SandboxError::PoolInitialization(msg),
            ClientError::PoolTimeout(_) | ClientError::PoolClosed => {
                SandboxError::Pool(e.to_string())
            }
            ClientError::InvalidConfig(msg) => SandboxError::Config(msg),
            ClientError::Backend(e) => SandboxError::Connection(e.message),
        }
    }
}

/// Sandbox result type.
pub type SandboxResult<T> = Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_client::BackendError;

    #[test]
    fn test_client_error_mapping() {
        let err: SandboxError = ClientError::Initialization("refused".into()).into();
        assert!(matches!(err, SandboxError::PoolInitialization(_)));

        let err: SandboxError = ClientError::PoolTimeout(100).into();
        assert!(matches!(err, SandboxError::Pool(ref m) if m.contains("100ms")));

        let err: SandboxError = ClientError::Backend(BackendError::connection("reset")).into();
        assert!(matches!(err, SandboxError::Connection(ref m) if m == "reset"));
    }
}
