//! Subcommand implementations.
//!
//! Each command returns its rendered output together with a success flag;
//! `main` prints the output and maps the flag to the exit code.

use anyhow::{Context, Result};
use tracing::info;

use sandbox_engine::{ExecutionMode, Sandbox, SandboxConfig, Session};

use crate::formatter::{
    format_execution, format_rewrites, format_statements, format_validation, OutputFormat,
};

/// Rendered command output.
#[derive(Debug)]
pub struct CommandOutput {
    /// Text to print.
    pub text: String,
    /// Whether the command succeeded.
    pub success: bool,
}

impl CommandOutput {
    fn new(text: String, success: bool) -> Self {
        Self { text, success }
    }
}

/// Where the session identifier comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionArg {
    /// No session; names are used as written.
    None,
    /// An explicit session identifier.
    Id(String),
    /// A fresh `<user>_<timestamp>` session.
    User(String),
}

/// Executes a script.
pub async fn exec(
    config: SandboxConfig,
    script: &str,
    session: SessionArg,
    mode: ExecutionMode,
    format: OutputFormat,
) -> Result<CommandOutput> {
    let max_token_len = config.max_token_len;
    let sandbox = Sandbox::from_config(config)?;

    let session_id = match session {
        SessionArg::None => None,
        SessionArg::Id(id) => Some(id),
        SessionArg::User(user) => Some(Session::for_user(&user, max_token_len)?.raw().to_string()),
    };

    info!(mode = %mode, session = session_id.as_deref().unwrap_or("-"), "executing script");
    let result = sandbox
        .execute_script(script, session_id.as_deref(), mode)
        .await
        .context("script execution failed")?;
    sandbox.shutdown().await;

    Ok(CommandOutput::new(
        format_execution(&result, format),
        result.success,
    ))
}

/// Validates a query.
pub async fn validate(
    config: SandboxConfig,
    query: &str,
    offline: bool,
    format: OutputFormat,
) -> Result<CommandOutput> {
    let sandbox = Sandbox::from_config(config)?;
    let result = if offline {
        sandbox.check_syntax(query)
    } else {
        sandbox
            .validate_query(query)
            .await
            .context("validation failed")?
    };
    sandbox.shutdown().await;

    Ok(CommandOutput::new(
        format_validation(&result, format),
        result.valid,
    ))
}

/// Splits a script into statements. Never touches the database.
pub fn split(config: SandboxConfig, script: &str, format: OutputFormat) -> Result<CommandOutput> {
    let sandbox = Sandbox::from_config(config)?;
    let statements = sandbox.split_statements(script);
    Ok(CommandOutput::new(
        format_statements(&statements, format),
        true,
    ))
}

/// Rewrites a script into a session namespace. Never touches the database.
pub fn rewrite(
    config: SandboxConfig,
    script: &str,
    session: &str,
    format: OutputFormat,
) -> Result<CommandOutput> {
    let session = Session::new(session, config.max_token_len)?;
    let sandbox = Sandbox::from_config(config)?;

    let rewritten = sandbox
        .split_statements(script)
        .iter()
        .map(|s| sandbox.namespace_statement(&s.text, session.raw()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CommandOutput::new(
        format_rewrites(session.token().as_str(), &rewritten, format),
        true,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> SandboxConfig {
        SandboxConfig::builder()
            .database_url(dir.path().join("cli.db").to_string_lossy().into_owned())
            .build()
    }

    #[tokio::test]
    async fn test_exec_reports_failure() {
        let dir = TempDir::new().unwrap();
        let output = exec(
            config_in(&dir),
            "CREATE TABLE t (id INT); INSERT INTO bogus VALUES (1);",
            SessionArg::Id("alice_1".into()),
            ExecutionMode::Adhoc,
            OutputFormat::Json,
        )
        .await
        .unwrap();

        assert!(!output.success);
        let parsed: serde_json::Value = serde_json::from_str(&output.text).unwrap();
        assert_eq!(parsed["statements"][0]["sql"], "CREATE TABLE alice_1_t (id INT)");
        assert_eq!(parsed["statements"][1]["status"], "failed");
    }

    #[tokio::test]
    async fn test_exec_with_user_session() {
        let dir = TempDir::new().unwrap();
        let output = exec(
            config_in(&dir),
            "CREATE TABLE t (id INT)",
            SessionArg::User("carol".into()),
            ExecutionMode::Setup,
            OutputFormat::Json,
        )
        .await
        .unwrap();

        assert!(output.success);
        let parsed: serde_json::Value = serde_json::from_str(&output.text).unwrap();
        assert!(parsed["session_token"].as_str().unwrap().starts_with("carol_"));
    }

    #[tokio::test]
    async fn test_validate_command() {
        let dir = TempDir::new().unwrap();
        let output = validate(config_in(&dir), "SELEC 1", false, OutputFormat::Table)
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.text.starts_with("invalid"));

        let output = validate(config_in(&dir), "SELECT 1", true, OutputFormat::Table)
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.text.contains("local syntax"));
    }

    #[test]
    fn test_split_command() {
        let dir = TempDir::new().unwrap();
        let output = split(config_in(&dir), "SELECT 1; SELECT 2;", OutputFormat::Table).unwrap();
        assert!(output.success);
        assert!(output.text.contains("2 statement(s)"));
    }

    #[test]
    fn test_rewrite_command() {
        let dir = TempDir::new().unwrap();
        let output = rewrite(
            config_in(&dir),
            "CREATE TABLE employees (id INT); SELECT * FROM employees;",
            "bob_1",
            OutputFormat::Table,
        )
        .unwrap();

        assert_eq!(
            output.text,
            "CREATE TABLE bob_1_employees (id INT);\nSELECT * FROM bob_1_employees;\n"
        );
    }

    #[test]
    fn test_rewrite_rejects_bad_session() {
        let dir = TempDir::new().unwrap();
        assert!(rewrite(config_in(&dir), "SELECT 1", "***", OutputFormat::Table).is_err());
    }
}
