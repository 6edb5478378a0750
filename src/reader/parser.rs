// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Recursive-descent parser: turns a [`Lexer`]'s token stream into nested
//! `Value::List`/atom trees, with source ranges recorded in a
//! [`DebugInfoTable`] alongside the result.
//!
//! There is no reader-macro sugar: no `quote`, no bracket/brace literals,
//! no keywords beyond the grammar's parens and atoms. A list is just
//! `(` followed by zero or more forms and a matching `)`.

#[cfg(test)]
mod parser_test;

#[cfg(any(test, feature = "std"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "std"))]
use std::string::String;
#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::collections::BTreeMap as HashMap;
#[cfg(not(any(test, feature = "std")))]
use alloc::string::String;
#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

use tracing::trace;

use crate::collections::list;
use crate::env::ExecCtx;
use crate::error::{ArborError, SyntaxErrorKind};
use crate::heap;
use crate::reader::lexer::{Lexer, Pos, Span, Token, TokenKind};
use crate::value::Value;
use crate::zone::ZoneId;

/// Which part of a parsed list a [`DebugInfoTable`] entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DebugInfoKey {
    /// The span of the list form itself, parens included.
    SelfRange(usize),
    /// The span of the `index`-th element, keyed by the containing list.
    Slot(usize, usize),
}

/// Source locations recorded while parsing, keyed by (containing list
/// object identity, slot). Lost across a `copy()` like any other
/// auxiliary metadata — it exists purely for diagnostics.
#[derive(Default)]
pub struct DebugInfoTable {
    pub filename: String,
    entries: HashMap<DebugInfoKey, Span>,
}

impl DebugInfoTable {
    fn insert_self(&mut self, list_ptr: usize, span: Span) {
        self.entries.insert(DebugInfoKey::SelfRange(list_ptr), span);
    }

    fn insert_slot(&mut self, list_ptr: usize, index: usize, span: Span) {
        self.entries.insert(DebugInfoKey::Slot(list_ptr, index), span);
    }

    #[must_use]
    pub fn self_range(&self, value: Value) -> Option<Span> {
        let ptr = value.as_gc_ptr()?.0.as_ptr() as usize;
        self.entries.get(&DebugInfoKey::SelfRange(ptr)).copied()
    }

    #[must_use]
    pub fn slot_range(&self, value: Value, index: usize) -> Option<Span> {
        let ptr = value.as_gc_ptr()?.0.as_ptr() as usize;
        self.entries.get(&DebugInfoKey::Slot(ptr, index)).copied()
    }
}

/// Parse every top-level form in `source`, returning a `Value::List` of
/// them plus their source locations.
///
/// # Errors
/// Any `core/syntax/*` error the grammar rejects, or
/// `core/limit-reached/stack-overflow` if the zone stack was already at
/// its configured bound.
pub fn parse_all(ctx: &mut ExecCtx, zone: ZoneId, source: &str, filename: &str) -> Result<(Value, DebugInfoTable), ArborError> {
    parse(ctx, zone, source, filename, false)
}

/// Parse exactly the first top-level form in `source` (ignoring whatever
/// follows), still returned wrapped in a single-element list for
/// consistency with [`parse_all`].
///
/// # Errors
/// Same as [`parse_all`].
pub fn parse_one(ctx: &mut ExecCtx, zone: ZoneId, source: &str, filename: &str) -> Result<(Value, DebugInfoTable), ArborError> {
    parse(ctx, zone, source, filename, true)
}

fn parse(ctx: &mut ExecCtx, zone: ZoneId, source: &str, filename: &str, parse_one: bool) -> Result<(Value, DebugInfoTable), ArborError> {
    let parser_zone = ctx.zone_enter(&[])?;
    let result = parse_body(ctx, zone, source, filename, parse_one);
    ctx.zone_exit(parser_zone);
    result
}

fn parse_body(ctx: &mut ExecCtx, zone: ZoneId, source: &str, filename: &str, parse_one: bool) -> Result<(Value, DebugInfoTable), ArborError> {
    let mut lexer = Lexer::new(source);
    let mut debug = DebugInfoTable {
        filename: filename.into(),
        entries: HashMap::new(),
    };
    let mut elems = Vec::new();
    let mut spans = Vec::new();
    let start = Pos::default();

    loop {
        let token = lexer.next()?;
        if matches!(token.kind, TokenKind::End) {
            break;
        }
        let span = token.span;
        let elem = parse_token(ctx, zone, &mut lexer, &mut debug, token)?;
        elems.push(elem);
        spans.push(span);
        if parse_one {
            break;
        }
    }

    let end = spans.last().map_or(start, |s| s.end);
    let list_value = build_list(ctx, zone, &elems, &spans, &mut debug, Span { start, end });
    Ok((list_value, debug))
}

fn build_list(
    ctx: &mut ExecCtx,
    zone: ZoneId,
    elems: &[Value],
    spans: &[Span],
    debug: &mut DebugInfoTable,
    self_span: Span,
) -> Value {
    let list_value = heap::new_list(ctx, zone, elems.len());
    let obj = list_value.as_gc_ptr().expect("new_list returns Value::List");
    for elem in elems {
        list::push(ctx, obj, *elem);
    }
    let ptr = obj.0.as_ptr() as usize;
    debug.insert_self(ptr, self_span);
    for (i, span) in spans.iter().enumerate() {
        debug.insert_slot(ptr, i, *span);
    }
    list_value
}

fn parse_list(
    ctx: &mut ExecCtx,
    zone: ZoneId,
    lexer: &mut Lexer,
    debug: &mut DebugInfoTable,
    start: Pos,
) -> Result<Value, ArborError> {
    let mut elems = Vec::new();
    let mut spans = Vec::new();

    loop {
        let token = lexer.next()?;
        match token.kind {
            TokenKind::End => {
                trace!(line = start.line, col = start.col, "unterminated list");
                return Err(ArborError::Syntax(SyntaxErrorKind::UnexpectedEof));
            }
            TokenKind::RightParen => {
                let self_span = Span { start, end: token.span.end };
                return Ok(build_list(ctx, zone, &elems, &spans, debug, self_span));
            }
            _ => {
                let span = token.span;
                let elem = parse_token(ctx, zone, lexer, debug, token)?;
                elems.push(elem);
                spans.push(span);
            }
        }
    }
}

fn parse_token(ctx: &mut ExecCtx, zone: ZoneId, lexer: &mut Lexer, debug: &mut DebugInfoTable, token: Token) -> Result<Value, ArborError> {
    match token.kind {
        TokenKind::Int(lexeme) => parse_int(lexeme),
        TokenKind::Real(lexeme) => parse_real(lexeme),
        TokenKind::Str(lexeme) => Ok(heap::new_str(ctx, zone, &unescape(lexeme))),
        TokenKind::Symbol(lexeme) => Ok(Value::Symbol(ctx.env.symtab.intern(lexeme))),
        TokenKind::LeftParen => parse_list(ctx, zone, lexer, debug, token.span.start),
        TokenKind::RightParen => Err(ArborError::Syntax(SyntaxErrorKind::UnexpectedToken)),
        TokenKind::End => Err(ArborError::Syntax(SyntaxErrorKind::UnexpectedEof)),
    }
}

fn parse_int(lexeme: &str) -> Result<Value, ArborError> {
    let stripped: String = lexeme.chars().filter(|c| *c != '_').collect();
    stripped
        .parse::<i32>()
        .map(Value::Int)
        .map_err(|_| ArborError::Syntax(SyntaxErrorKind::BadNumber))
}

fn parse_real(lexeme: &str) -> Result<Value, ArborError> {
    let stripped: String = lexeme.chars().filter(|c| *c != '_').collect();
    stripped
        .parse::<f64>()
        .map(Value::Real)
        .map_err(|_| ArborError::Syntax(SyntaxErrorKind::BadNumber))
}

/// Resolve `\n \r \t` and pass any other escaped character through
/// literally (including `\\` and `\"`).
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
