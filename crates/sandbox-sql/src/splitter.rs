//! Statement splitting.
//!
//! Splits free-form SQL script text into discrete executable statements
//! without parsing it. The scanner works line by line with three pieces of
//! state: whether it is inside a procedural block, whether a block
//! terminator is pending, and the text of the statement being accumulated.
//!
//! Outside a procedural block every top-level `;` closes a statement.
//! Semicolons inside string literals, quoted identifiers and comments are
//! ignored, and quote state carries across lines. Inside a procedural block
//! only a standalone terminator line (conventionally `/`) closes the
//! statement. An `END;` line only arms the terminator, so a blank line or a
//! comment may sit between `END;` and `/`.
//!
//! Only a block `END` arms the terminator. `CASE ... END` expressions are
//! counted while scanning block lines, so an `END;` that closes a `CASE`
//! never ends the block.
//!
//! # Limitations
//!
//! The block state machine is flat. Nested `BEGIN ... END;` blocks are kept
//! together only because an armed `END;` followed by more code is treated as
//! an inner `END` (see [`SplitOptions::require_terminator`]). An armed block
//! is closed early only by a following `CREATE` stored-program header.

use std::fmt;

use serde::Serialize;

use crate::classify::{classify, leading_words, StatementKind};
use crate::lexer::{dollar_tag, LexOptions, Lexer, TokenKind};

/// Whether a statement is a plain statement or a procedural block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementForm {
    /// Semicolon-terminated statement.
    Simple,
    /// `BEGIN ... END` style unit executed as one statement.
    ProceduralBlock,
}

impl fmt::Display for StatementForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementForm::Simple => write!(f, "simple"),
            StatementForm::ProceduralBlock => write!(f, "procedural-block"),
        }
    }
}

/// One discrete executable unit extracted from a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// 1-based position in the script.
    pub ordinal: usize,
    /// Statement text. Simple statements omit their terminating `;`,
    /// procedural blocks omit their terminator line.
    pub text: String,
    /// Simple statement or procedural block.
    pub form: StatementForm,
    /// 1-based line the statement starts on.
    pub line: usize,
}

impl Statement {
    /// Returns the statement classification.
    pub fn kind(&self) -> StatementKind {
        match (self.form, classify(&self.text)) {
            // `BEGIN ... END;` is a block here, not a transaction start.
            (StatementForm::ProceduralBlock, StatementKind::TransactionControl) => {
                StatementKind::Procedural
            }
            (_, kind) => kind,
        }
    }

    /// Returns true if this is a procedural block.
    pub fn is_procedural(&self) -> bool {
        self.form == StatementForm::ProceduralBlock
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Options controlling how scripts are split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    /// Marker that starts a line comment.
    pub comment_marker: String,
    /// Standalone line that closes a procedural block.
    pub block_terminator: String,
    /// Whether `BEGIN` and `DECLARE` open anonymous blocks.
    pub anonymous_blocks: bool,
    /// Object kinds whose `CREATE` header opens a block.
    pub block_objects: Vec<String>,
    /// When true, an armed `END;` followed by more code is an inner `END`
    /// and only the terminator line closes the block. When false, the block
    /// closes before the next significant line.
    pub require_terminator: bool,
    /// Whether `$tag$` dollar-quoted bodies are string literals.
    pub dollar_quotes: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self::oracle()
    }
}

impl SplitOptions {
    /// PL/SQL style scripts: `BEGIN`, `DECLARE` and stored-program headers
    /// open blocks closed by a `/` line.
    pub fn oracle() -> Self {
        Self {
            comment_marker: "--".to_string(),
            block_terminator: "/".to_string(),
            anonymous_blocks: true,
            block_objects: ["PROCEDURE", "FUNCTION", "TRIGGER", "PACKAGE", "TYPE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            require_terminator: true,
            dollar_quotes: false,
        }
    }

    /// SQLite scripts: only triggers have bodies, and they end at `END;`.
    pub fn sqlite() -> Self {
        Self {
            anonymous_blocks: false,
            block_objects: vec!["TRIGGER".to_string()],
            require_terminator: false,
            ..Self::oracle()
        }
    }

    /// PostgreSQL scripts: bodies are dollar-quoted, so no block mode.
    pub fn postgres() -> Self {
        Self {
            anonymous_blocks: false,
            block_objects: Vec::new(),
            require_terminator: false,
            dollar_quotes: true,
            ..Self::oracle()
        }
    }

    /// Sets the line comment marker.
    pub fn comment_marker(mut self, marker: impl Into<String>) -> Self {
        self.comment_marker = marker.into();
        self
    }

    /// Sets the block terminator line.
    pub fn block_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.block_terminator = terminator.into();
        self
    }

    /// Returns the lexer options implied by these split options.
    pub fn lex_options(&self) -> LexOptions {
        LexOptions {
            comment_marker: self.comment_marker.clone(),
            dollar_quotes: self.dollar_quotes,
        }
    }
}

/// Splits scripts into statements.
#[derive(Debug, Clone, Default)]
pub struct StatementSplitter {
    options: SplitOptions,
}

impl StatementSplitter {
    /// Creates a splitter with the given options.
    pub fn new(options: SplitOptions) -> Self {
        Self { options }
    }

    /// Returns the options.
    pub fn options(&self) -> &SplitOptions {
        &self.options
    }

    /// Splits `script` into ordered statements.
    pub fn split(&self, script: &str) -> Vec<Statement> {
        let mut state = SplitState::new(&self.options);
        for (idx, raw) in script.split('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            state.feed_line(line, idx + 1);
        }
        state.finish()
    }
}

/// Splits `script` with the default (PL/SQL style) options.
pub fn split_statements(script: &str) -> Vec<Statement> {
    StatementSplitter::default().split(script)
}

/// Quote and comment state carried across lines.
#[derive(Debug, Default)]
struct ScanState {
    in_single_quote: bool,
    in_double_quote: bool,
    in_block_comment: bool,
    dollar_tag: Option<String>,
}

impl ScanState {
    fn is_idle(&self) -> bool {
        !self.in_single_quote
            && !self.in_double_quote
            && !self.in_block_comment
            && self.dollar_tag.is_none()
    }
}

struct SplitState<'o> {
    options: &'o SplitOptions,
    lex: LexOptions,
    statements: Vec<Statement>,
    scan: ScanState,
    buffer: String,
    has_code: bool,
    start_line: usize,
    in_block: bool,
    terminator_pending: bool,
    case_depth: usize,
}

impl<'o> SplitState<'o> {
    fn new(options: &'o SplitOptions) -> Self {
        Self {
            options,
            lex: options.lex_options(),
            statements: Vec::new(),
            scan: ScanState::default(),
            buffer: String::new(),
            has_code: false,
            start_line: 1,
            in_block: false,
            terminator_pending: false,
            case_depth: 0,
        }
    }

    fn feed_line(&mut self, line: &str, line_no: usize) {
        if self.in_block && self.feed_block_line(line, line_no) {
            return;
        }
        self.scan_line(line, line_no);
    }

    /// Feeds a line while inside a block. Returns false if the block was
    /// closed implicitly and the line still needs normal scanning.
    fn feed_block_line(&mut self, line: &str, line_no: usize) -> bool {
        let trimmed = line.trim();
        if trimmed == self.options.block_terminator {
            self.close_block();
            return true;
        }

        if self.terminator_pending && !crate::classify::is_blank(trimmed, &self.lex) {
            if self.opens_stored_program(line) {
                self.close_block();
                self.begin_block(line, line_no);
                return true;
            }
            if !self.options.require_terminator {
                self.close_block();
                return false;
            }
            self.terminator_pending = false;
        }

        self.push_line(line);
        if self.ends_with_end(line) {
            self.terminator_pending = true;
        }
        true
    }

    fn scan_line(&mut self, line: &str, line_no: usize) {
        if self.at_statement_start() && self.opens_block(line) {
            self.begin_block(line, line_no);
            return;
        }

        let mut seg_start = 0;
        let mut i = 0;
        while i < line.len() {
            let rest = &line[i..];
            let Some(c) = rest.chars().next() else {
                break;
            };

            if self.scan.in_block_comment {
                if rest.starts_with("*/") {
                    self.scan.in_block_comment = false;
                    i += 2;
                } else {
                    i += c.len_utf8();
                }
                continue;
            }
            if self.scan.in_single_quote || self.scan.in_double_quote {
                let quote = if self.scan.in_single_quote { '\'' } else { '"' };
                if c == quote {
                    if rest[1..].starts_with(quote) {
                        i += 2;
                        continue;
                    }
                    self.scan.in_single_quote = false;
                    self.scan.in_double_quote = false;
                }
                i += c.len_utf8();
                continue;
            }
            if self.scan.dollar_tag.is_some() {
                let closing =
                    matches!(self.scan.dollar_tag.as_deref(), Some(tag) if rest.starts_with(tag));
                if closing {
                    i += self.scan.dollar_tag.take().map_or(0, |tag| tag.len());
                } else {
                    i += c.len_utf8();
                }
                continue;
            }

            let marker = self.options.comment_marker.as_str();
            if !marker.is_empty() && rest.starts_with(marker) {
                break;
            }
            if rest.starts_with("/*") {
                self.scan.in_block_comment = true;
                i += 2;
                continue;
            }

            match c {
                '\'' => {
                    self.mark_code(line_no);
                    self.scan.in_single_quote = true;
                }
                '"' => {
                    self.mark_code(line_no);
                    self.scan.in_double_quote = true;
                }
                '$' if self.options.dollar_quotes => {
                    self.mark_code(line_no);
                    if let Some(tag) = dollar_tag(rest) {
                        self.scan.dollar_tag = Some(tag.to_string());
                        i += tag.len();
                        continue;
                    }
                }
                ';' => {
                    self.buffer.push_str(&line[seg_start..i]);
                    self.emit(StatementForm::Simple);
                    i += 1;
                    seg_start = i;

                    let tail = &line[seg_start..];
                    if self.opens_block(tail) {
                        self.begin_block(tail, line_no);
                        return;
                    }
                    continue;
                }
                c if c.is_whitespace() => {}
                _ => self.mark_code(line_no),
            }
            i += c.len_utf8();
        }

        self.push_line(&line[seg_start..]);
    }

    fn finish(mut self) -> Vec<Statement> {
        let form = if self.in_block {
            StatementForm::ProceduralBlock
        } else {
            StatementForm::Simple
        };
        self.emit(form);
        self.statements
    }

    fn at_statement_start(&self) -> bool {
        !self.has_code && self.scan.is_idle()
    }

    fn mark_code(&mut self, line_no: usize) {
        if !self.has_code {
            self.has_code = true;
            self.start_line = line_no;
        }
    }

    fn push_line(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    fn begin_block(&mut self, text: &str, line_no: usize) {
        self.in_block = true;
        self.case_depth = 0;
        self.mark_code(line_no);
        self.push_line(text);
        self.terminator_pending = self.ends_with_end(text);
    }

    fn close_block(&mut self) {
        self.emit(StatementForm::ProceduralBlock);
        self.in_block = false;
        self.terminator_pending = false;
        self.case_depth = 0;
    }

    fn emit(&mut self, form: StatementForm) {
        let text = std::mem::take(&mut self.buffer);
        if !std::mem::replace(&mut self.has_code, false) {
            return;
        }
        self.statements.push(Statement {
            ordinal: self.statements.len() + 1,
            text: text.trim().to_string(),
            form,
            line: self.start_line,
        });
    }

    /// Returns true if `text` starts with a block-opening header.
    fn opens_block(&self, text: &str) -> bool {
        let words = leading_words(text, &self.lex, 6);
        let word = |i: usize| words.get(i).map(String::as_str);

        match word(0) {
            Some("DECLARE") => self.options.anonymous_blocks,
            Some("BEGIN") => {
                let transaction = matches!(
                    word(1),
                    Some(";" | "TRANSACTION" | "WORK" | "TRAN" | "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE")
                );
                self.options.anonymous_blocks && !transaction
            }
            Some("CREATE") => {
                let mut i = 1;
                if word(1) == Some("OR") && word(2) == Some("REPLACE") {
                    i = 3;
                }
                while matches!(
                    word(i),
                    Some("EDITIONABLE" | "NONEDITIONABLE" | "TEMP" | "TEMPORARY")
                ) {
                    i += 1;
                }
                word(i).is_some_and(|object| {
                    self.options
                        .block_objects
                        .iter()
                        .any(|o| o.eq_ignore_ascii_case(object))
                })
            }
            _ => false,
        }
    }

    /// Returns true if `text` starts with a `CREATE` header that opens a block.
    fn opens_stored_program(&self, text: &str) -> bool {
        let create = leading_words(text, &self.lex, 1)
            .first()
            .is_some_and(|w| w == "CREATE");
        create && self.opens_block(text)
    }

    /// Returns true if `text` ends with a block `END;` or `END name;`.
    /// Tracks `CASE ... END` nesting across the lines of a block.
    fn ends_with_end(&mut self, text: &str) -> bool {
        let sig: Vec<_> = Lexer::new(text, &self.lex)
            .filter(|t| !t.is_trivia())
            .collect();

        let mut block_end = None;
        let mut i = 0;
        while i < sig.len() {
            let tok = &sig[i];
            if tok.is_keyword("CASE") {
                self.case_depth += 1;
            } else if tok.is_keyword("END") {
                match sig.get(i + 1).map(|t| t.upper()).as_deref() {
                    Some("IF" | "LOOP") => i += 1,
                    Some("CASE") => {
                        self.case_depth = self.case_depth.saturating_sub(1);
                        i += 1;
                    }
                    _ if self.case_depth > 0 => self.case_depth -= 1,
                    _ => block_end = Some(i),
                }
            }
            i += 1;
        }

        let n = sig.len();
        let Some(end) = block_end else {
            return false;
        };
        if n < 2 || !sig[n - 1].is_punct(';') {
            return false;
        }
        end == n - 2
            || (end + 3 == n && matches!(sig[n - 2].kind, TokenKind::Word | TokenKind::QuotedIdent))
    }
}
