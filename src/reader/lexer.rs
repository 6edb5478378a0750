// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tokenizer: turns source text into a stream of lexical tokens.
//!
//! Operates byte-at-a-time like the grammar it implements (parens,
//! whitespace, digits, and quotes are all single-byte ASCII), so a symbol
//! or string body can carry arbitrary UTF-8 without the lexer needing to
//! decode it.

#[cfg(test)]
mod lexer_test;

use tracing::trace;

use crate::error::{ArborError, SyntaxErrorKind};

/// A byte offset plus line/column, 1-based to match how editors report
/// positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Symbol(&'a str),
    /// Raw bytes between the quotes, escapes not yet resolved.
    Str(&'a str),
    Int(&'a str),
    Real(&'a str),
    LeftParen,
    RightParen,
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

fn is_space(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | 0x0b | 0x0c)
}

fn is_new_line(ch: u8) -> bool {
    ch == b'\r' || ch == b'\n'
}

fn is_end(ch: u8) -> bool {
    ch == 0
}

fn is_comment(ch: u8) -> bool {
    ch == b';'
}

fn is_paren(ch: u8) -> bool {
    ch == b'(' || ch == b')'
}

fn is_digit(ch: u8) -> bool {
    ch.is_ascii_digit()
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn here(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
            offset: self.pos,
        }
    }

    fn advance(&mut self) {
        if self.pos < self.src.len() {
            self.pos += 1;
            self.col += 1;
        }
    }

    fn handle_new_line(&mut self, current: u8) {
        self.advance();
        if current == b'\r' && self.peek() == b'\n' {
            self.advance();
        }
        self.col = 1;
        self.line += 1;
    }

    fn skip_comment(&mut self) {
        loop {
            self.advance();
            let ch = self.peek();
            if is_new_line(ch) || is_end(ch) {
                return;
            }
        }
    }

    /// Slice of raw source text from `start` (a byte offset) to the
    /// current position.
    fn slice(&self, start: usize) -> &'a str {
        core::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default()
    }

    fn error(&self, kind: SyntaxErrorKind, start: Pos) -> ArborError {
        trace!(
            line = start.line,
            col = start.col,
            end_line = self.line,
            end_col = self.col,
            category = kind.category(),
            "lexer error"
        );
        ArborError::Syntax(kind)
    }

    /// Read the next token.
    ///
    /// # Errors
    /// `core/syntax/bad-number` on a malformed numeric literal,
    /// `core/syntax/bad-string` on an unterminated string.
    pub fn next(&mut self) -> Result<Token<'a>, ArborError> {
        loop {
            let ch = self.peek();
            if is_end(ch) {
                let here = self.here();
                return Ok(Token {
                    kind: TokenKind::End,
                    span: Span { start: here, end: here },
                });
            }
            if is_space(ch) {
                self.advance();
                continue;
            }
            if is_comment(ch) {
                self.skip_comment();
                continue;
            }
            if is_new_line(ch) {
                self.handle_new_line(ch);
                continue;
            }
            if is_paren(ch) {
                let start = self.here();
                self.advance();
                let kind = if ch == b'(' { TokenKind::LeftParen } else { TokenKind::RightParen };
                return Ok(Token {
                    kind,
                    span: Span { start, end: self.here() },
                });
            }
            if ch == b'-' {
                let start = self.pos;
                let start_pos = self.here();
                self.advance();
                return if is_digit(self.peek()) {
                    self.continue_number(start, start_pos)
                } else {
                    Ok(self.continue_symbol(start, start_pos))
                };
            }
            if is_digit(ch) {
                let start = self.pos;
                let start_pos = self.here();
                return self.continue_number(start, start_pos);
            }
            if ch == b'"' {
                return self.handle_string();
            }
            let start = self.pos;
            let start_pos = self.here();
            self.advance();
            return Ok(self.continue_symbol(start, start_pos));
        }
    }

    fn continue_number(&mut self, start: usize, start_pos: Pos) -> Result<Token<'a>, ArborError> {
        self.advance();
        let mut dotted = false;
        loop {
            let ch = self.peek();
            if ch == b'.' {
                self.advance();
                if dotted {
                    return Err(self.error(SyntaxErrorKind::BadNumber, start_pos));
                }
                dotted = true;
            } else if ch == b'_' || is_digit(ch) {
                self.advance();
            } else if is_space(ch) || is_new_line(ch) || is_end(ch) || is_comment(ch) {
                let lexeme = self.slice(start);
                let kind = if dotted { TokenKind::Real(lexeme) } else { TokenKind::Int(lexeme) };
                return Ok(Token {
                    kind,
                    span: Span { start: start_pos, end: self.here() },
                });
            } else {
                return Err(self.error(SyntaxErrorKind::BadNumber, start_pos));
            }
        }
    }

    fn handle_string(&mut self) -> Result<Token<'a>, ArborError> {
        self.advance();
        let start = self.pos;
        let start_pos = self.here();
        loop {
            let ch = self.peek();
            if ch == b'"' {
                let lexeme = self.slice(start);
                let span = Span { start: start_pos, end: self.here() };
                self.advance();
                return Ok(Token {
                    kind: TokenKind::Str(lexeme),
                    span,
                });
            } else if ch == b'\\' {
                self.advance();
                let next = self.peek();
                if !(is_end(next) || is_new_line(next)) {
                    self.advance();
                }
            } else if is_end(ch) || is_new_line(ch) {
                return Err(self.error(SyntaxErrorKind::BadString, start_pos));
            } else {
                self.advance();
            }
        }
    }

    /// A symbol never terminates on a comment marker mid-token — only
    /// whitespace, newline, end-of-input, or a paren ends it.
    fn continue_symbol(&mut self, start: usize, start_pos: Pos) -> Token<'a> {
        loop {
            let ch = self.peek();
            if is_space(ch) || is_new_line(ch) || is_end(ch) || is_paren(ch) {
                let lexeme = self.slice(start);
                return Token {
                    kind: TokenKind::Symbol(lexeme),
                    span: Span { start: start_pos, end: self.here() },
                };
            }
            self.advance();
        }
    }
}
