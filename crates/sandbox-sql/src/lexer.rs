//! A minimal SQL lexer.
//!
//! This is not a parser. It only knows enough about SQL text to tell words
//! apart from string literals, quoted identifiers and comments, so that the
//! splitter and namespacer never act on text inside a literal or a comment.

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare identifier or keyword (may contain `$` and `#` after the first char).
    Word,
    /// Double-quoted identifier, quotes included.
    QuotedIdent,
    /// Single-quoted or dollar-quoted string literal, quotes included.
    String,
    /// Numeric literal.
    Number,
    /// Line comment or block comment.
    Comment,
    /// Run of whitespace.
    Whitespace,
    /// Any other single character.
    Punct,
}

/// A token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token kind.
    pub kind: TokenKind,
    /// Source text of the token.
    pub text: &'a str,
    /// Byte offset of the token in the source.
    pub start: usize,
}

impl<'a> Token<'a> {
    /// Returns true for whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Returns true if this is a word equal to `keyword`, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Returns true if this is the punctuation character `c`.
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.starts_with(c)
    }

    /// Returns the uppercase form of a word, or an empty string otherwise.
    pub fn upper(&self) -> String {
        if self.kind == TokenKind::Word {
            self.text.to_ascii_uppercase()
        } else {
            String::new()
        }
    }
}

/// Lexer options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexOptions {
    /// Marker that starts a line comment.
    pub comment_marker: String,
    /// Whether `$tag$ ... $tag$` bodies are string literals.
    pub dollar_quotes: bool,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            comment_marker: "--".to_string(),
            dollar_quotes: false,
        }
    }
}

/// Streaming lexer over SQL text.
pub struct Lexer<'a, 'o> {
    src: &'a str,
    pos: usize,
    options: &'o LexOptions,
}

impl<'a, 'o> Lexer<'a, 'o> {
    /// Creates a lexer over `src`.
    pub fn new(src: &'a str, options: &'o LexOptions) -> Self {
        Self {
            src,
            pos: 0,
            options,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Returns the byte length of the token starting at the current position.
    fn token_len(&self) -> (TokenKind, usize) {
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return (TokenKind::Whitespace, 0);
        };

        if !self.options.comment_marker.is_empty() && rest.starts_with(&self.options.comment_marker)
        {
            let len = rest.find('\n').unwrap_or(rest.len());
            return (TokenKind::Comment, len);
        }
        if rest.starts_with("/*") {
            let len = rest[2..].find("*/").map(|i| i + 4).unwrap_or(rest.len());
            return (TokenKind::Comment, len);
        }
        if c.is_whitespace() {
            let len = rest
                .find(|ch: char| !ch.is_whitespace())
                .unwrap_or(rest.len());
            return (TokenKind::Whitespace, len);
        }
        if c == '\'' {
            return (TokenKind::String, quoted_len(rest, '\''));
        }
        if c == '"' {
            return (TokenKind::QuotedIdent, quoted_len(rest, '"'));
        }
        if c == '$' && self.options.dollar_quotes {
            if let Some(tag) = dollar_tag(rest) {
                let body = &rest[tag.len()..];
                let len = body
                    .find(tag)
                    .map(|i| tag.len() + i + tag.len())
                    .unwrap_or(rest.len());
                return (TokenKind::String, len);
            }
        }
        if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#'))
                .unwrap_or(rest.len());
            return (TokenKind::Word, len);
        }
        if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
                .unwrap_or(rest.len());
            return (TokenKind::Number, len);
        }
        (TokenKind::Punct, c.len_utf8())
    }
}

impl<'a, 'o> Iterator for Lexer<'a, 'o> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.src.len() {
            return None;
        }
        let (kind, len) = self.token_len();
        let start = self.pos;
        self.pos += len;
        Some(Token {
            kind,
            text: &self.src[start..self.pos],
            start,
        })
    }
}

/// Tokenizes `src` into a vector.
pub fn tokenize<'a>(src: &'a str, options: &LexOptions) -> Vec<Token<'a>> {
    Lexer::new(src, options).collect()
}

/// Length of a quoted run starting at `rest[0] == quote`, honoring doubled
/// quotes as escapes. Unterminated runs extend to the end of input.
pub(crate) fn quoted_len(rest: &str, quote: char) -> usize {
    let mut chars = rest.char_indices().skip(1).peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                chars.next();
                continue;
            }
            return i + ch.len_utf8();
        }
    }
    rest.len()
}

/// Parses a dollar-quote opening tag (`$$` or `$name$`) at the start of `rest`.
pub(crate) fn dollar_tag(rest: &str) -> Option<&str> {
    let body = rest.strip_prefix('$')?;
    let end = body.find('$')?;
    let name = &body[..end];
    let valid = name
        .chars()
        .enumerate()
        .all(|(i, ch)| ch == '_' || ch.is_alphabetic() || (i > 0 && ch.is_ascii_digit()));
    if valid {
        Some(&rest[..end + 2])
    } else {
        None
    }
}
