//! Coarse statement classification by leading keyword.

use std::fmt;

use serde::Serialize;

use crate::lexer::{LexOptions, Lexer, TokenKind};

/// What a statement does, as far as the engine needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Returns rows (SELECT, WITH, VALUES, SHOW, EXPLAIN, ...).
    Query,
    /// Modifies rows (INSERT, UPDATE, DELETE, MERGE, REPLACE).
    Dml,
    /// Changes schema (CREATE, DROP, ALTER, TRUNCATE, ...).
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT and friends.
    TransactionControl,
    /// Anonymous procedural block or procedure call.
    Procedural,
    /// Anything else (PRAGMA, SET, ...).
    Other,
}

impl StatementKind {
    /// Returns true if affected-row counts are meaningful for this kind.
    pub fn reports_rows_affected(&self) -> bool {
        matches!(self, StatementKind::Dml)
    }

    /// Returns a short label.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Query => "query",
            StatementKind::Dml => "dml",
            StatementKind::Ddl => "ddl",
            StatementKind::TransactionControl => "transaction",
            StatementKind::Procedural => "procedural",
            StatementKind::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a single statement by its first keyword.
pub fn classify(sql: &str) -> StatementKind {
    let options = LexOptions::default();
    let mut words = Lexer::new(sql, &options)
        .filter(|t| !t.is_trivia() && !t.is_punct('('))
        .map(|t| t.upper());

    let first = match words.next() {
        Some(word) if !word.is_empty() => word,
        _ => return StatementKind::Other,
    };

    match first.as_str() {
        "SELECT" | "WITH" | "VALUES" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" | "TABLE" => {
            StatementKind::Query
        }
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE" | "UPSERT" => StatementKind::Dml,
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" | "COMMENT" | "GRANT" | "REVOKE" => {
            StatementKind::Ddl
        }
        "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" | "ABORT" => {
            StatementKind::TransactionControl
        }
        "START" => match words.next().as_deref() {
            Some("TRANSACTION") => StatementKind::TransactionControl,
            _ => StatementKind::Other,
        },
        "SET" => match words.next().as_deref() {
            Some("TRANSACTION") => StatementKind::TransactionControl,
            _ => StatementKind::Other,
        },
        "BEGIN" => StatementKind::TransactionControl,
        "DECLARE" | "CALL" | "EXEC" | "EXECUTE" | "DO" => StatementKind::Procedural,
        _ => StatementKind::Other,
    }
}

/// Returns true if the text contains nothing but whitespace and comments.
pub fn is_blank(sql: &str, options: &LexOptions) -> bool {
    Lexer::new(sql, options).all(|t| t.is_trivia())
}

/// Returns the uppercase leading keywords of `sql`, skipping trivia.
pub(crate) fn leading_words(sql: &str, options: &LexOptions, limit: usize) -> Vec<String> {
    Lexer::new(sql, options)
        .filter(|t| !t.is_trivia())
        .take(limit)
        .map(|t| match t.kind {
            TokenKind::Word => t.upper(),
            _ => t.text.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_queries() {
        assert_eq!(classify("SELECT 1"), StatementKind::Query);
        assert_eq!(classify("  -- leading\n select * from t"), StatementKind::Query);
        assert_eq!(classify("(SELECT 1) UNION (SELECT 2)"), StatementKind::Query);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Query);
    }

    #[test]
    fn test_classify_dml_and_ddl() {
        assert_eq!(classify("insert into t values (1)"), StatementKind::Dml);
        assert_eq!(classify("UPDATE t SET a = 1"), StatementKind::Dml);
        assert_eq!(classify("CREATE TABLE t (id INT)"), StatementKind::Ddl);
        assert_eq!(classify("drop view v"), StatementKind::Ddl);
    }

    #[test]
    fn test_classify_transaction_control() {
        assert_eq!(classify("BEGIN"), StatementKind::TransactionControl);
        assert_eq!(classify("COMMIT"), StatementKind::TransactionControl);
        assert_eq!(classify("START TRANSACTION"), StatementKind::TransactionControl);
        assert_eq!(classify("SET TRANSACTION READ ONLY"), StatementKind::TransactionControl);
        assert_eq!(classify("SET search_path = x"), StatementKind::Other);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(""), StatementKind::Other);
        assert_eq!(classify("PRAGMA table_info(t)"), StatementKind::Other);
        assert_eq!(classify("DECLARE x NUMBER; BEGIN NULL; END;"), StatementKind::Procedural);
    }

    #[test]
    fn test_is_blank() {
        let options = LexOptions::default();
        assert!(is_blank("  -- only a comment\n /* and another */ ", &options));
        assert!(!is_blank("-- comment\nSELECT 1", &options));
    }
}
