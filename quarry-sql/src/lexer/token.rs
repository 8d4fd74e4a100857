//! Template token types

use std::fmt;

/// Token kinds produced by the template scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// `:name`, a positional bind parameter.
    BindParam(String),
    /// `t:name`, a symbolic table reference.
    TableRef(String),
    /// `c:name`, a symbolic column reference.
    ColumnRef(String),
    /// Any other identifier-like word, passed through untouched.
    Word(String),
    /// A single-quoted literal, quotes included.
    Quoted(String),
    /// Whitespace, punctuation, numbers and anything else between words.
    Text(String),

    // Special
    Eof,
}

impl TokenKind {
    /// Whether the compiler rewrites this token.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            TokenKind::BindParam(_) | TokenKind::TableRef(_) | TokenKind::ColumnRef(_)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::BindParam(name) => write!(f, ":{}", name),
            TokenKind::TableRef(name) => write!(f, "t:{}", name),
            TokenKind::ColumnRef(name) => write!(f, "c:{}", name),
            TokenKind::Word(s) | TokenKind::Quoted(s) | TokenKind::Text(s) => f.write_str(s),
            TokenKind::Eof => Ok(()),
        }
    }
}

/// Byte range of a token in the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
