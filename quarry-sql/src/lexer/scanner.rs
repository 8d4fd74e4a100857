//! Template scanner
//!
//! A single left-to-right pass with two states, "in word" and "in quoted
//! literal". Words start with an ASCII letter, `_` or `:` and may continue
//! with digits. Inside a single-quoted literal a doubled quote is an escaped
//! quote and nothing is interpreted.

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

// ============================================================================
// SCANNER IMPLEMENTATION
// ============================================================================

/// Tokenizer for symbolic SQL templates.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given template.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            pos: 0,
        }
    }

    /// Tokenize the entire template. The last token is always `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        tokens
    }

    fn next_token(&mut self) -> Token {
        let start = self.pos;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) if is_word_start(c) => self.scan_word(),
            Some('\'') => self.scan_quoted(),
            Some(_) => self.scan_text(),
        };

        Token {
            kind,
            span: Span {
                start,
                end: self.pos,
            },
        }
    }

    /// Scan a word and classify it by its first one or two characters.
    fn scan_word(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if is_word_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        classify_word(&self.source[start..self.pos])
    }

    fn scan_quoted(&mut self) -> TokenKind {
        let start = self.pos;
        self.advance(); // opening quote

        loop {
            match self.peek_char() {
                // Unterminated literals run to the end of the template.
                None => break,
                Some('\'') => {
                    self.advance();
                    if self.peek_char() == Some('\'') {
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }

        TokenKind::Quoted(self.source[start..self.pos].to_string())
    }

    fn scan_text(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if is_word_start(c) || c == '\'' {
                break;
            }
            self.advance();
        }
        TokenKind::Text(self.source[start..self.pos].to_string())
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((i, c)) = self.chars.next() {
            self.pos = i + c.len_utf8();
            Some(c)
        } else {
            None
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_word_char(c: char) -> bool {
    is_word_start(c) || c.is_ascii_digit()
}

/// Words are ASCII-only, so byte indexing is safe here.
fn classify_word(word: &str) -> TokenKind {
    let bytes = word.as_bytes();
    if bytes.len() > 1 && bytes[0] == b':' {
        // `::type` is a cast, not a parameter.
        if bytes[1] == b':' {
            return TokenKind::Word(word.to_string());
        }
        return TokenKind::BindParam(word[1..].to_string());
    }
    if bytes.len() > 2 && bytes[1] == b':' {
        return match bytes[0] {
            b'c' => TokenKind::ColumnRef(word[2..].to_string()),
            b't' => TokenKind::TableRef(word[2..].to_string()),
            _ => TokenKind::Word(word.to_string()),
        };
    }
    TokenKind::Word(word.to_string())
}

// =============================================================================
// TESTS
// =============================================================================
