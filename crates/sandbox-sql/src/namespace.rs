//! Session namespacing.
//!
//! Rewrites object names in a statement so that objects created and
//! referenced by one session live under a session-specific prefix. The
//! rewrite is token based: text inside string literals and comments is never
//! touched, schema-qualified names are left alone, and names that already
//! carry the prefix are skipped so the rewrite is idempotent.
//!
//! Names are rewritten in these positions:
//!
//! - the object name of `CREATE [OR REPLACE] ... TABLE | VIEW | TYPE | INDEX | TRIGGER`
//! - names following `FROM`, `JOIN`, `INTO`, `UPDATE` and `REFERENCES`
//! - comma-separated table lists after `FROM`
//! - the object of `DROP`, `ALTER` and `TRUNCATE`, and `RENAME TO` targets
//! - the table after the first `ON` of `CREATE INDEX` / `CREATE TRIGGER`
//! - type names after `TABLE OF` and `REF` in attribute definitions
//!
//! Names declared by a `WITH` clause are query-local and never prefixed.
//! `SELECT ... INTO` names a variable only inside procedural code; at top
//! level it creates a table and the target is prefixed.
//!
//! Dynamic SQL inside string literals is not rewritten.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::lexer::{LexOptions, Lexer, Token, TokenKind};
use crate::splitter::{Statement, StatementForm};

/// Errors produced while building a session namespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// The raw session identifier had no usable characters.
    #[error("session token '{raw}' has no usable characters")]
    EmptyToken {
        /// The rejected input.
        raw: String,
    },
}

/// Result type for namespace operations.
pub type NamespaceResult<T> = Result<T, NamespaceError>;

// ============================================================================
// Session token
// ============================================================================

/// A sanitized session identifier.
///
/// Always matches `^[A-Za-z_][A-Za-z0-9_]*$`, is at most
/// [`SessionToken::DEFAULT_MAX_LEN`] characters (or the length given to
/// [`SessionToken::sanitize_with_max`]) and is not made of underscores only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Default maximum token length.
    pub const DEFAULT_MAX_LEN: usize = 20;

    /// Sanitizes a raw session identifier with the default maximum length.
    pub fn sanitize(raw: &str) -> NamespaceResult<Self> {
        Self::sanitize_with_max(raw, Self::DEFAULT_MAX_LEN)
    }

    /// Sanitizes a raw session identifier.
    ///
    /// Characters outside `[A-Za-z0-9_]` are dropped. A leading digit gets
    /// an `s` prefix. The result is truncated to `max_len` characters.
    pub fn sanitize_with_max(raw: &str, max_len: usize) -> NamespaceResult<Self> {
        let mut token: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();

        if token.chars().all(|c| c == '_') {
            return Err(NamespaceError::EmptyToken {
                raw: raw.to_string(),
            });
        }
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            token.insert(0, 's');
        }
        token.truncate(max_len.max(1));

        if token.chars().all(|c| c == '_') {
            return Err(NamespaceError::EmptyToken {
                raw: raw.to_string(),
            });
        }
        Ok(Self(token))
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the object name prefix (`<token>_`).
    pub fn prefix(&self) -> String {
        format!("{}_", self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Options
// ============================================================================

/// Catalog and system names that are never prefixed.
const SYSTEM_NAMES: &[&str] = &[
    "DUAL",
    "USER_TABLES",
    "USER_VIEWS",
    "USER_OBJECTS",
    "USER_TAB_COLUMNS",
    "USER_CONSTRAINTS",
    "USER_INDEXES",
    "USER_TYPES",
    "USER_SOURCE",
    "USER_ERRORS",
    "USER_SEQUENCES",
    "USER_TRIGGERS",
    "ALL_TABLES",
    "ALL_OBJECTS",
    "ALL_TAB_COLUMNS",
    "ALL_VIEWS",
    "DBA_TABLES",
    "DBA_OBJECTS",
    "DICTIONARY",
    "DICT",
    "INFORMATION_SCHEMA",
    "SQLITE_MASTER",
    "SQLITE_SCHEMA",
    "SQLITE_TEMP_MASTER",
    "SQLITE_SEQUENCE",
];

/// Name prefixes of dynamic views and system catalogs.
const SYSTEM_PREFIXES: &[&str] = &["V$", "GV$", "PG_", "SQLITE_"];

/// Options for [`SessionNamespacer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Exact names (uppercase) that are never prefixed.
    pub allow_list: Vec<String>,
    /// Name prefixes (uppercase) that are never prefixed.
    pub allow_prefixes: Vec<String>,
    /// Lexer options used to find literals and comments.
    pub lex: LexOptions,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            allow_list: SYSTEM_NAMES.iter().map(|s| s.to_string()).collect(),
            allow_prefixes: SYSTEM_PREFIXES.iter().map(|s| s.to_string()).collect(),
            lex: LexOptions::default(),
        }
    }
}

impl NamespaceOptions {
    /// Adds an exact name to the allow-list.
    pub fn allow(mut self, name: impl AsRef<str>) -> Self {
        self.allow_list.push(name.as_ref().to_ascii_uppercase());
        self
    }

    /// Adds a name prefix to the allow-list.
    pub fn allow_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.allow_prefixes.push(prefix.as_ref().to_ascii_uppercase());
        self
    }

    /// Sets the lexer options.
    pub fn lex_options(mut self, lex: LexOptions) -> Self {
        self.lex = lex;
        self
    }
}

// ============================================================================
// Namespacer
// ============================================================================

/// Rewrites statements into a session namespace.
#[derive(Debug, Clone)]
pub struct SessionNamespacer {
    token: SessionToken,
    prefix: String,
    prefix_upper: String,
    options: NamespaceOptions,
}

impl SessionNamespacer {
    /// Creates a namespacer with default options.
    pub fn new(token: SessionToken) -> Self {
        Self::with_options(token, NamespaceOptions::default())
    }

    /// Creates a namespacer with custom options.
    pub fn with_options(token: SessionToken, options: NamespaceOptions) -> Self {
        let prefix = token.prefix();
        let prefix_upper = prefix.to_ascii_uppercase();
        Self {
            token,
            prefix,
            prefix_upper,
            options,
        }
    }

    /// Returns the session token.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Returns the name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns true if `name` is left alone: already prefixed, or a
    /// catalog/system name.
    pub fn is_exempt(&self, name: &str) -> bool {
        let upper = name.to_ascii_uppercase();
        upper.starts_with(&self.prefix_upper)
            || self.options.allow_list.iter().any(|n| *n == upper)
            || self
                .options
                .allow_prefixes
                .iter()
                .any(|p| upper.starts_with(p.as_str()))
    }

    /// Rewrites one statement.
    pub fn rewrite(&self, sql: &str) -> String {
        self.rewrite_as(sql, StatementForm::Simple)
    }

    fn rewrite_as(&self, sql: &str, form: StatementForm) -> String {
        let tokens: Vec<Token<'_>> = Lexer::new(sql, &self.options.lex).collect();
        let procedural =
            form == StatementForm::ProceduralBlock || opens_procedural_code(&tokens);
        let targets = RefScan::new(&tokens, procedural).run();

        let mut out = String::with_capacity(sql.len() + targets.len() * self.prefix.len());
        for (tok, target) in tokens.iter().zip(targets.iter().copied()) {
            match (target, tok.kind) {
                (true, TokenKind::Word) if !self.is_exempt(tok.text) => {
                    out.push_str(&self.prefix);
                    out.push_str(tok.text);
                }
                (true, TokenKind::QuotedIdent) if !self.is_exempt(unquote(tok.text)) => {
                    out.push('"');
                    out.push_str(&self.prefix);
                    out.push_str(&tok.text[1..]);
                }
                _ => out.push_str(tok.text),
            }
        }
        out
    }

    /// Rewrites split statements, keeping ordinals, forms and lines.
    pub fn rewrite_all(&self, statements: &[Statement]) -> Vec<Statement> {
        statements
            .iter()
            .map(|s| Statement {
                text: self.rewrite_as(&s.text, s.form),
                ..s.clone()
            })
            .collect()
    }
}

/// Rewrites `sql` into the namespace of `token` with default options.
pub fn namespace_statement(sql: &str, token: &SessionToken) -> String {
    SessionNamespacer::new(token.clone()).rewrite(sql)
}

fn unquote(text: &str) -> &str {
    let inner = text.strip_prefix('"').unwrap_or(text);
    inner.strip_suffix('"').unwrap_or(inner)
}

/// Returns true if the tokens start an anonymous block or a stored program.
fn opens_procedural_code(tokens: &[Token<'_>]) -> bool {
    let words: Vec<String> = tokens
        .iter()
        .filter(|t| !t.is_trivia())
        .take(8)
        .map(|t| t.upper())
        .collect();
    let word = |i: usize| words.get(i).map(String::as_str);

    match word(0) {
        Some("DECLARE") => true,
        Some("BEGIN") => !matches!(
            word(1),
            None | Some("" | "TRANSACTION" | "WORK" | "TRAN" | "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE")
        ),
        Some("CREATE") => {
            let mut i = 1;
            if word(1) == Some("OR") && word(2) == Some("REPLACE") {
                i = 3;
            }
            while word(i).is_some_and(|w| CREATE_MODIFIERS.contains(&w)) {
                i += 1;
            }
            matches!(
                word(i),
                Some("PROCEDURE" | "FUNCTION" | "TRIGGER" | "PACKAGE")
            ) || (word(i) == Some("TYPE") && word(i + 1) == Some("BODY"))
        }
        _ => false,
    }
}

// ============================================================================
// Reference scan
// ============================================================================

/// Words that never name a table in a reference position. Also ends a
/// comma-separated `FROM` list.
const RESERVED: &[&str] = &[
    "SELECT", "VALUES", "WITH", "LATERAL", "ONLY", "TABLE", "SET", "WHERE", "FROM", "AS", "ON",
    "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "OUTER", "GROUP",
    "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT", "MINUS", "WINDOW",
    "RETURNING", "WHEN", "THEN", "ELSE", "END", "AND", "OR", "NOT", "NULL", "IF", "EXISTS",
    "DEFAULT", "FETCH", "FOR", "INTO", "BEGIN", "DECLARE", "CONNECT", "START", "PIVOT",
    "UNPIVOT", "PARTITION", "CASE", "DO", "LOOP", "BULK", "INDEXED", "ASC", "DESC", "NULLS",
    "IS", "IN", "LIKE", "BETWEEN",
];

/// Functions whose argument syntax uses `FROM` without naming a table.
const FROM_FUNCTIONS: &[&str] = &["EXTRACT", "TRIM", "SUBSTRING", "SUBSTR", "POSITION", "OVERLAY"];

/// Words before `UPDATE` that make it a clause rather than a statement.
const UPDATE_CLAUSE_WORDS: &[&str] = &["FOR", "ON", "BEFORE", "AFTER", "OF", "OR", "DO", "INSTEAD"];

/// Words after which `INTO` targets a variable rather than a table.
const INTO_VARIABLE_WORDS: &[&str] = &["SELECT", "FETCH", "RETURNING", "COLLECT", "IMMEDIATE"];

/// Modifiers allowed between `CREATE [OR REPLACE]` and the object kind.
const CREATE_MODIFIERS: &[&str] = &[
    "TEMP",
    "TEMPORARY",
    "GLOBAL",
    "LOCAL",
    "MATERIALIZED",
    "FORCE",
    "NOFORCE",
    "EDITIONABLE",
    "NONEDITIONABLE",
    "UNIQUE",
    "VIRTUAL",
];

/// Built-in type names after `TABLE OF` / `REF`.
const BUILTIN_TYPES: &[&str] = &[
    "NUMBER",
    "VARCHAR2",
    "VARCHAR",
    "NVARCHAR2",
    "CHAR",
    "NCHAR",
    "INTEGER",
    "INT",
    "SMALLINT",
    "PLS_INTEGER",
    "BINARY_INTEGER",
    "BOOLEAN",
    "DATE",
    "TIMESTAMP",
    "CLOB",
    "BLOB",
    "RAW",
    "LONG",
    "FLOAT",
    "REAL",
    "DECIMAL",
    "NUMERIC",
    "TEXT",
    "ROWID",
    "CURSOR",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

/// Finds the tokens that name objects. Returns one flag per token.
struct RefScan<'t, 'a> {
    tokens: &'t [Token<'a>],
    sig: Vec<usize>,
    targets: Vec<bool>,
    parens: Vec<bool>,
    from_depth: Option<usize>,
    ctes: Vec<String>,
    procedural: bool,
    into_is_variable: bool,
    merging: bool,
    pending_on: bool,
}

impl<'t, 'a> RefScan<'t, 'a> {
    fn new(tokens: &'t [Token<'a>], procedural: bool) -> Self {
        let sig = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_trivia())
            .map(|(i, _)| i)
            .collect();
        Self {
            tokens,
            sig,
            targets: vec![false; tokens.len()],
            parens: Vec::new(),
            from_depth: None,
            ctes: Vec::new(),
            procedural,
            into_is_variable: false,
            merging: false,
            pending_on: false,
        }
    }

    fn run(mut self) -> Vec<bool> {
        self.collect_ctes();
        let mut j = 0;
        while j < self.sig.len() {
            let tok = self.tokens[self.sig[j]];
            j = match tok.kind {
                TokenKind::Punct => self.punct(j, tok),
                TokenKind::Word => self.word_at(j, tok.upper()),
                _ => j + 1,
            };
        }
        self.targets
    }

    // ===== Token helpers =====

    fn word(&self, j: usize) -> Option<String> {
        let tok = self.tokens[*self.sig.get(j)?];
        (tok.kind == TokenKind::Word).then(|| tok.upper())
    }

    fn word_is(&self, j: usize, expected: &str) -> bool {
        self.word(j).as_deref() == Some(expected)
    }

    fn punct_is(&self, j: usize, c: char) -> bool {
        self.sig
            .get(j)
            .is_some_and(|&i| self.tokens[i].is_punct(c))
    }

    fn prev_word(&self, j: usize) -> Option<String> {
        j.checked_sub(1).and_then(|p| self.word(p))
    }

    /// Comparison key of a name token: uppercase words, unquoted identifiers.
    fn name_key(&self, j: usize) -> Option<String> {
        let tok = self.tokens[*self.sig.get(j)?];
        match tok.kind {
            TokenKind::Word if !is_reserved(&tok.upper()) => Some(tok.upper()),
            TokenKind::QuotedIdent => Some(unquote(tok.text).to_ascii_uppercase()),
            _ => None,
        }
    }

    /// Returns the index just past the parenthesis group opening at `j`.
    fn skip_parens(&self, j: usize) -> usize {
        let mut depth = 0usize;
        let mut k = j;
        while k < self.sig.len() {
            if self.punct_is(k, '(') {
                depth += 1;
            } else if self.punct_is(k, ')') {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return k + 1;
                }
            }
            k += 1;
        }
        k
    }

    /// Records the names declared by `WITH [RECURSIVE] name [(cols)] AS (...)`.
    fn collect_ctes(&mut self) {
        for j in 0..self.sig.len() {
            if !self.word_is(j, "WITH") {
                continue;
            }
            let mut k = j + 1;
            if self.word_is(k, "RECURSIVE") {
                k += 1;
            }
            while let Some(name) = self.name_key(k) {
                let mut m = k + 1;
                if self.punct_is(m, '(') {
                    m = self.skip_parens(m);
                }
                if !self.word_is(m, "AS") {
                    break;
                }
                m += 1;
                if self.word_is(m, "NOT") {
                    m += 1;
                }
                if self.word_is(m, "MATERIALIZED") {
                    m += 1;
                }
                if !self.punct_is(m, '(') {
                    break;
                }
                self.ctes.push(name);
                m = self.skip_parens(m);
                if !self.punct_is(m, ',') {
                    break;
                }
                k = m + 1;
            }
        }
    }

    // ===== Dispatch =====

    fn punct(&mut self, j: usize, tok: Token<'_>) -> usize {
        if tok.is_punct('(') {
            let function = self
                .prev_word(j)
                .is_some_and(|w| FROM_FUNCTIONS.contains(&w.as_str()));
            self.parens.push(function);
        } else if tok.is_punct(')') {
            self.parens.pop();
            if self.from_depth.is_some_and(|d| d > self.parens.len()) {
                self.from_depth = None;
            }
        } else if tok.is_punct(',') && self.from_depth == Some(self.parens.len()) {
            return self.table_ref(j + 1, true);
        } else if tok.is_punct(';') {
            self.from_depth = None;
            self.into_is_variable = false;
            self.merging = false;
            self.pending_on = false;
        }
        j + 1
    }

    fn word_at(&mut self, j: usize, word: String) -> usize {
        if self.from_depth == Some(self.parens.len()) && word != "AS" && is_reserved(&word) {
            self.from_depth = None;
        }

        match word.as_str() {
            "CREATE" => self.create(j),
            "FROM" => {
                let in_function = self.parens.last().copied().unwrap_or(false);
                if in_function || self.prev_word(j).as_deref() == Some("DISTINCT") {
                    return j + 1;
                }
                self.from_depth = Some(self.parens.len());
                self.table_ref(j + 1, true)
            }
            "JOIN" => self.table_ref(j + 1, true),
            "INTO" if !self.into_is_variable => self.table_ref(j + 1, false),
            "UPDATE" => {
                let clause = self
                    .prev_word(j)
                    .is_some_and(|w| UPDATE_CLAUSE_WORDS.contains(&w.as_str()))
                    || (j > 0 && self.punct_is(j - 1, ','));
                if clause {
                    j + 1
                } else {
                    self.table_ref(j + 1, false)
                }
            }
            "REFERENCES" => self.table_ref(j + 1, false),
            "DROP" | "ALTER" | "TRUNCATE" => self.object_ref(j, &word),
            "RENAME" if self.word_is(j + 1, "TO") => self.table_ref(j + 2, false),
            "ON" if self.pending_on => {
                self.pending_on = false;
                self.table_ref(j + 1, false)
            }
            "USING" if self.merging => {
                self.merging = false;
                self.table_ref(j + 1, false)
            }
            "TABLE" if self.word_is(j + 1, "OF") => self.type_ref(j + 2),
            "REF" if self.is_ref_type(j) => self.type_ref(j + 1),
            "INSERT" => {
                self.into_is_variable = false;
                j + 1
            }
            "MERGE" => {
                self.into_is_variable = false;
                self.merging = true;
                j + 1
            }
            w if self.procedural && INTO_VARIABLE_WORDS.contains(&w) => {
                self.into_is_variable = true;
                j + 1
            }
            _ => j + 1,
        }
    }

    // ===== Reference positions =====

    /// Marks the name at `j` if it is an unqualified object name.
    fn table_ref(&mut self, j: usize, allow_function: bool) -> usize {
        let Some(&idx) = self.sig.get(j) else {
            return j;
        };
        let tok = self.tokens[idx];
        match tok.kind {
            TokenKind::Word if !is_reserved(&tok.upper()) => {}
            TokenKind::QuotedIdent => {}
            _ => return j,
        }
        // schema-qualified
        if self.punct_is(j + 1, '.') {
            return j + 1;
        }
        if self
            .name_key(j)
            .is_some_and(|name| self.ctes.contains(&name))
        {
            return j + 1;
        }
        // table function
        if allow_function && self.punct_is(j + 1, '(') {
            return j + 1;
        }
        self.targets[idx] = true;
        j + 1
    }

    /// `REF` names a type only in an attribute definition: `(attr REF type`.
    fn is_ref_type(&self, j: usize) -> bool {
        !self.parens.is_empty()
            && self.prev_word(j).is_some_and(|w| !is_reserved(&w))
            && self.word(j + 1).is_some_and(|w| !is_reserved(&w))
    }

    fn type_ref(&mut self, j: usize) -> usize {
        match self.word(j) {
            Some(w) if BUILTIN_TYPES.contains(&w.as_str()) => j + 1,
            _ => self.table_ref(j, false),
        }
    }

    fn create(&mut self, j: usize) -> usize {
        let mut k = j + 1;
        if self.word_is(k, "OR") && self.word_is(k + 1, "REPLACE") {
            k += 2;
        }
        while self
            .word(k)
            .is_some_and(|w| CREATE_MODIFIERS.contains(&w.as_str()))
        {
            k += 1;
        }

        match self.word(k).as_deref() {
            Some("TABLE" | "VIEW") => k += 1,
            Some("INDEX" | "TRIGGER") => {
                self.pending_on = true;
                k += 1;
            }
            Some("TYPE") => {
                k += 1;
                if self.word_is(k, "BODY") {
                    k += 1;
                }
            }
            _ => return j + 1,
        }

        if self.word_is(k, "IF") && self.word_is(k + 1, "NOT") && self.word_is(k + 2, "EXISTS") {
            k += 3;
        }
        self.table_ref(k, false)
    }

    fn object_ref(&mut self, j: usize, verb: &str) -> usize {
        let mut k = j + 1;
        if self.word_is(k, "MATERIALIZED") {
            k += 1;
        }
        match self.word(k).as_deref() {
            Some("TABLE" | "VIEW" | "INDEX" | "TRIGGER") => k += 1,
            Some("TYPE") => {
                k += 1;
                if self.word_is(k, "BODY") {
                    k += 1;
                }
            }
            _ if verb == "TRUNCATE" => {}
            _ => return j + 1,
        }
        if self.word_is(k, "IF") && self.word_is(k + 1, "EXISTS") {
            k += 2;
        }
        self.table_ref(k, false)
    }
}
