//! Output formatting.
//!
//! Supports table and JSON output formats.

use comfy_table::{Cell, ContentArrangement, Table};
use serde_json::json;

use sandbox_engine::{
    ExecutionResult, Statement, StatementOutcome, StatementStatus, ValidationResult,
};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Formatted table output.
    Table,
    /// JSON output.
    Json,
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Shortens text to one line of at most `max` characters.
fn one_line(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut short: String = flat.chars().take(max.saturating_sub(3)).collect();
    short.push_str("...");
    short
}

// ============================================================================
// Execution
// ============================================================================

/// Formats a script execution result.
pub fn format_execution(result: &ExecutionResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(result),
        OutputFormat::Table => execution_table(result),
    }
}

fn execution_table(result: &ExecutionResult) -> String {
    let mut out = String::new();

    let mut table = new_table();
    table.set_header(vec!["#", "Kind", "Status", "Rows", "Time (ms)", "Statement / Error"]);
    for outcome in &result.statements {
        table.add_row(vec![
            Cell::new(outcome.ordinal),
            Cell::new(outcome.kind),
            Cell::new(outcome.status),
            Cell::new(row_cell(outcome)),
            Cell::new(format!("{:.2}", outcome.execution_time.as_secs_f64() * 1000.0)),
            Cell::new(detail_cell(outcome)),
        ]);
    }
    if !result.statements.is_empty() {
        out.push_str(&table.to_string());
        out.push('\n');
    }

    for outcome in result.statements.iter().filter(|o| o.has_rows()) {
        out.push_str(&format!("\nStatement {}:\n", outcome.ordinal));
        out.push_str(&rows_table(outcome));
        out.push('\n');
        if outcome.truncated {
            out.push_str("(rows truncated)\n");
        }
    }

    if let Some(error) = &result.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    if let Some(token) = &result.session_token {
        out.push_str(&format!("Session: {}\n", token));
    }
    out.push_str(&format!(
        "{} [{}] {} in {:.2} ms\n",
        if result.success { "OK" } else { "FAILED" },
        result.mode,
        result.summary(),
        result.execution_time.as_secs_f64() * 1000.0
    ));
    out
}

fn row_cell(outcome: &StatementOutcome) -> String {
    match (outcome.rows_affected, outcome.has_rows()) {
        (Some(n), _) => n.to_string(),
        (None, true) => outcome.rows.len().to_string(),
        (None, false) => String::new(),
    }
}

fn detail_cell(outcome: &StatementOutcome) -> String {
    match (&outcome.error, outcome.status) {
        (Some(error), _) => error.to_string(),
        (None, StatementStatus::Skipped) => format!("(skipped) {}", one_line(&outcome.sql, 60)),
        (None, _) => one_line(&outcome.sql, 60),
    }
}

fn rows_table(outcome: &StatementOutcome) -> String {
    let mut table = new_table();
    table.set_header(outcome.columns.iter().map(Cell::new));
    for row in &outcome.rows {
        table.add_row(row.iter().map(|v| Cell::new(v.to_string())));
    }
    table.to_string()
}

// ============================================================================
// Validation
// ============================================================================

/// Formats a validation result.
pub fn format_validation(result: &ValidationResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(result),
        OutputFormat::Table => {
            let verdict = if result.valid { "valid" } else { "invalid" };
            let mut out = format!("{} ({})\n", verdict, result.method);
            if let Some(error) = &result.error {
                match result.ordinal {
                    Some(ordinal) => out.push_str(&format!("statement {}: {}\n", ordinal, error)),
                    None => out.push_str(&format!("{}\n", error)),
                }
            }
            out
        }
    }
}

// ============================================================================
// Split / rewrite
// ============================================================================

/// Formats split statements.
pub fn format_statements(statements: &[Statement], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = statements
                .iter()
                .map(|s| {
                    json!({
                        "ordinal": s.ordinal,
                        "line": s.line,
                        "form": s.form,
                        "kind": s.kind(),
                        "text": s.text,
                    })
                })
                .collect();
            to_json(&items)
        }
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(vec!["#", "Line", "Form", "Kind", "Text"]);
            for s in statements {
                table.add_row(vec![
                    Cell::new(s.ordinal),
                    Cell::new(s.line),
                    Cell::new(s.form),
                    Cell::new(s.kind()),
                    Cell::new(&s.text),
                ]);
            }
            format!("{}\n{} statement(s)\n", table, statements.len())
        }
    }
}

/// Formats rewritten statements.
pub fn format_rewrites(token: &str, rewritten: &[String], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(&json!({
            "session_token": token,
            "statements": rewritten,
        })),
        OutputFormat::Table => {
            let mut out = String::new();
            for sql in rewritten {
                out.push_str(sql);
                out.push_str(";\n");
            }
            out
        }
    }
}
