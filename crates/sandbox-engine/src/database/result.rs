//! Execution and validation results.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use sandbox_client::{QueryResult, Value};
use sandbox_sql::{Statement, StatementKind};

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

// ============================================================================
// Mode
// ============================================================================

/// How a script is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Each statement runs on its own; failures do not stop the script.
    #[default]
    Adhoc,
    /// All statements run in one transaction; the first failure rolls back.
    Setup,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Adhoc => write!(f, "adhoc"),
            ExecutionMode::Setup => write!(f, "setup"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adhoc" | "ad-hoc" => Ok(ExecutionMode::Adhoc),
            "setup" => Ok(ExecutionMode::Setup),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

// ============================================================================
// Statement outcome
// ============================================================================

/// Per-statement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementStatus {
    /// The statement ran successfully.
    Succeeded,
    /// The statement was rejected.
    Failed,
    /// The statement was never attempted.
    Skipped,
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementStatus::Succeeded => write!(f, "ok"),
            StatementStatus::Failed => write!(f, "failed"),
            StatementStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A statement rejected by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementError {
    /// Backend error code, if the backend reports one.
    pub code: Option<String>,
    /// Backend error message, unaltered.
    pub message: String,
    /// The statement text that failed.
    pub statement: String,
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of one statement in a script.
#[derive(Debug, Clone, Serialize)]
pub struct StatementOutcome {
    /// 1-based position in the script.
    pub ordinal: usize,
    /// Executed text, after namespacing.
    pub sql: String,
    /// Statement classification.
    pub kind: StatementKind,
    /// Status.
    pub status: StatementStatus,
    /// Failure details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StatementError>,
    /// Rows affected, for DML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Column names, for queries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Returned rows, for queries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Value>>,
    /// Whether rows were dropped to honor the row limit.
    pub truncated: bool,
    /// Wall-clock time spent on this statement.
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub execution_time: Duration,
}

impl StatementOutcome {
    /// Outcome of a statement that ran.
    pub fn succeeded(statement: &Statement, kind: StatementKind, result: QueryResult) -> Self {
        Self {
            ordinal: statement.ordinal,
            sql: statement.text.clone(),
            kind,
            status: StatementStatus::Succeeded,
            error: None,
            rows_affected: result.rows_affected,
            columns: result.columns,
            rows: result.rows,
            truncated: result.truncated,
            execution_time: result.execution_time,
        }
    }

    /// Outcome of a statement that was rejected.
    pub fn failed(
        statement: &Statement,
        kind: StatementKind,
        code: Option<String>,
        message: impl Into<String>,
        execution_time: Duration,
    ) -> Self {
        Self {
            ordinal: statement.ordinal,
            sql: statement.text.clone(),
            kind,
            status: StatementStatus::Failed,
            error: Some(StatementError {
                code,
                message: message.into(),
                statement: statement.text.clone(),
            }),
            rows_affected: None,
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
            execution_time,
        }
    }

    /// Outcome of a statement that was never attempted.
    pub fn skipped(statement: &Statement) -> Self {
        Self {
            ordinal: statement.ordinal,
            sql: statement.text.clone(),
            kind: statement.kind(),
            status: StatementStatus::Skipped,
            error: None,
            rows_affected: None,
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
            execution_time: Duration::ZERO,
        }
    }

    /// Returns true if the statement succeeded.
    pub fn is_success(&self) -> bool {
        self.status == StatementStatus::Succeeded
    }

    /// Returns true if the statement returned a row set.
    pub fn has_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

// ============================================================================
// Execution result
// ============================================================================

/// Result of executing a script.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Whether the script met its mode's success policy.
    pub success: bool,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Sanitized session token, if a session was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Per-statement outcomes, in script order.
    pub statements: Vec<StatementOutcome>,
    /// Whether a rollback was issued.
    pub rolled_back: bool,
    /// Script-level failure not tied to one statement (commit failure, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time for the whole call.
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub execution_time: Duration,
}

impl ExecutionResult {
    /// Result of a script with no statements.
    pub fn empty(mode: ExecutionMode, session_token: Option<String>) -> Self {
        Self {
            success: true,
            mode,
            session_token,
            statements: Vec::new(),
            rolled_back: false,
            error: None,
            execution_time: Duration::ZERO,
        }
    }

    /// Number of statements that succeeded.
    pub fn succeeded(&self) -> usize {
        self.count(StatementStatus::Succeeded)
    }

    /// Number of statements that failed.
    pub fn failed(&self) -> usize {
        self.count(StatementStatus::Failed)
    }

    /// Number of statements that were skipped.
    pub fn skipped(&self) -> usize {
        self.count(StatementStatus::Skipped)
    }

    fn count(&self, status: StatementStatus) -> usize {
        self.statements.iter().filter(|s| s.status == status).count()
    }

    /// First statement failure, if any.
    pub fn first_error(&self) -> Option<&StatementError> {
        self.statements.iter().find_map(|s| s.error.as_ref())
    }

    /// Serializes the result as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} statement(s): {} succeeded, {} failed, {} skipped",
            self.statements.len(),
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
        if self.rolled_back {
            out.push_str(" (rolled back)");
        }
        out
    }
}

// ============================================================================
// Validation result
// ============================================================================

/// How a query was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    /// The backend's own parse/prepare facility.
    ParseOnly,
    /// Executed inside a transaction that was rolled back.
    RolledBackTransaction,
    /// Parsed locally, without the backend.
    LocalSyntax,
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMethod::ParseOnly => write!(f, "parse-only"),
            ValidationMethod::RolledBackTransaction => write!(f, "rolled-back transaction"),
            ValidationMethod::LocalSyntax => write!(f, "local syntax"),
        }
    }
}

/// Result of validating a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Whether the query is valid.
    pub valid: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordinal of the offending statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<usize>,
    /// Validation method used.
    pub method: ValidationMethod,
}

impl ValidationResult {
    /// A passing result.
    pub fn valid(method: ValidationMethod) -> Self {
        Self {
            valid: true,
            error: None,
            ordinal: None,
            method,
        }
    }

    /// A failing result.
    pub fn invalid(
        error: impl Into<String>,
        ordinal: Option<usize>,
        method: ValidationMethod,
    ) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            ordinal,
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_sql::split_statements;

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!("setup".parse::<ExecutionMode>().unwrap(), ExecutionMode::Setup);
        assert_eq!("ADHOC".parse::<ExecutionMode>().unwrap(), ExecutionMode::Adhoc);
        assert!("batch".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_result_counts_and_summary() {
        let stmts = split_statements("SELECT 1; SELECT x; SELECT 3;");
        let result = ExecutionResult {
            success: false,
            mode: ExecutionMode::Setup,
            session_token: None,
            statements: vec![
                StatementOutcome::succeeded(&stmts[0], StatementKind::Query, QueryResult::empty()),
                StatementOutcome::failed(
                    &stmts[1],
                    StatementKind::Query,
                    None,
                    "no such column: x",
                    Duration::ZERO,
                ),
                StatementOutcome::skipped(&stmts[2]),
            ],
            rolled_back: true,
            error: None,
            execution_time: Duration::from_millis(3),
        };

        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.first_error().unwrap().message, "no such column: x");
        assert_eq!(
            result.summary(),
            "3 statement(s): 1 succeeded, 1 failed, 1 skipped (rolled back)"
        );
    }

    #[test]
    fn test_result_json() {
        let stmts = split_statements("SELECT x");
        let mut result = ExecutionResult::empty(ExecutionMode::Adhoc, Some("alice_1".into()));
        result.success = false;
        result.statements.push(StatementOutcome::failed(
            &stmts[0],
            StatementKind::Query,
            Some("1".into()),
            "no such column: x",
            Duration::from_millis(2),
        ));

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["mode"], "adhoc");
        assert_eq!(json["session_token"], "alice_1");
        assert_eq!(json["statements"][0]["status"], "failed");
        assert_eq!(json["statements"][0]["error"]["message"], "no such column: x");
        assert_eq!(json["statements"][0]["execution_time_ms"], 2.0);
    }

    #[test]
    fn test_validation_result() {
        let ok = ValidationResult::valid(ValidationMethod::ParseOnly);
        assert!(ok.valid);
        assert!(ok.error.is_none());

        let bad = ValidationResult::invalid("empty query", None, ValidationMethod::LocalSyntax);
        assert!(!bad.valid);
        assert_eq!(bad.error.as_deref(), Some("empty query"));
    }
}
