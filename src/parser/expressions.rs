//! Filter expression parsing and resolution
//!
//! This module implements the variable-and-filter-chain grammar used by
//! `{{ ... }}` tokens and by every tag argument:
//!
//! ```text
//! literal-or-lookup ('|' filter-name (':' literal-or-lookup)?)*
//! ```
//!
//! A literal is a quoted string (single or double quotes, backslash
//! escapes), a translation-marked string `_("...")` (recognized, passed
//! through untranslated), or a number (parsed permissively, numeric type
//! retained). A lookup is a dotted path of identifier segments resolved at
//! render time.
//!
//! Parsing consumes the entire input; any unmatched remainder is a syntax
//! error naming the unparsed fragment. Filter names are checked against the
//! parser's merged registry at compile time, as is filter arity.
//!
//! # Resolution
//!
//! Lookup failure is a distinguished not-found result, never an exception:
//! [`FilterExpression::resolve`] maps it to the engine's fallback string (or
//! to a none-value when the caller opts into `ignore_failures`), so
//! rendering cannot raise on missing data.

use crate::context::stack::Context;
use crate::context::value::Value;
use crate::error::SyntaxError;
use crate::filters::{ArgPolicy, FilterDef};
use crate::parser::parser::Parser;

/// A dotted-path variable lookup, e.g. `user.name` or `items.0`.
///
/// Each segment is resolved against the current value by trying map-key
/// access, then numeric list indexing; first success wins. A resolved
/// [`Value::Callable`] is invoked with zero arguments and replaced by its
/// result before the next segment applies.
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) path: Vec<String>,
    /// The original dotted text, used in fallback-string substitution.
    pub(crate) var: String,
}

impl Variable {
    /// Resolve against the context. `None` is the not-found sentinel,
    /// distinct from `Value::None`.
    pub(crate) fn resolve(&self, context: &Context) -> Option<Value> {
        let mut current = context.get(&self.path[0])?.clone();
        current = invoke_if_callable(current);

        for segment in &self.path[1..] {
            let next = match current.get_key(segment) {
                Some(v) => v.clone(),
                None => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| current.get_index(i))?
                    .clone(),
            };
            current = invoke_if_callable(next);
        }
        Some(current)
    }
}

fn invoke_if_callable(value: Value) -> Value {
    match value {
        Value::Callable(c) => c.invoke(),
        other => other,
    }
}

/// A compiled literal or lookup, usable as an expression base or as a
/// filter argument.
#[derive(Debug, Clone)]
pub(crate) enum ExprAtom {
    Literal(Value),
    Var(Variable),
}

impl ExprAtom {
    fn resolve(&self, context: &Context) -> Option<Value> {
        match self {
            ExprAtom::Literal(v) => Some(v.clone()),
            ExprAtom::Var(var) => var.resolve(context),
        }
    }
}

/// One filter application within a chain.
#[derive(Clone)]
pub(crate) struct FilterCall {
    pub(crate) name: String,
    pub(crate) def: FilterDef,
    pub(crate) arg: Option<ExprAtom>,
}

impl std::fmt::Debug for FilterCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCall")
            .field("name", &self.name)
            .field("arg", &self.arg)
            .finish()
    }
}

/// A compiled variable expression: a base plus an ordered filter chain.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    pub(crate) token: String,
    pub(crate) base: ExprAtom,
    pub(crate) filters: Vec<FilterCall>,
}

impl FilterExpression {
    /// Compile an expression string, looking filters up in the parser's
    /// merged registry. Invoked once per variable/tag-argument token.
    pub(crate) fn compile(text: &str, parser: &Parser) -> Result<Self, SyntaxError> {
        let line = parser.current_line();
        let text = text.trim();
        let mut cursor = Cursor { text, pos: 0 };

        let base = cursor
            .parse_atom()
            .ok_or_else(|| cursor.remainder_error(line))?;

        let mut filters = Vec::new();
        while cursor.eat('|') {
            let name = cursor.parse_ident();
            if name.is_empty() {
                return Err(cursor.remainder_error(line));
            }
            let def = parser.find_filter(&name).ok_or_else(|| {
                SyntaxError::new(format!("Invalid filter: '{}'", name), line)
            })?;
            let arg = if cursor.eat(':') {
                Some(
                    cursor
                        .parse_atom()
                        .ok_or_else(|| cursor.remainder_error(line))?,
                )
            } else {
                None
            };
            match def.arg {
                ArgPolicy::Required if arg.is_none() => {
                    return Err(SyntaxError::new(
                        format!("filter '{}' requires an argument", name),
                        line,
                    ));
                }
                ArgPolicy::None if arg.is_some() => {
                    return Err(SyntaxError::new(
                        format!("filter '{}' does not accept an argument", name),
                        line,
                    ));
                }
                _ => {}
            }
            filters.push(FilterCall { name, def, arg });
        }

        if cursor.pos < text.len() {
            return Err(cursor.remainder_error(line));
        }

        Ok(FilterExpression {
            token: text.to_string(),
            base,
            filters,
        })
    }

    /// Resolve the base and thread it through the filter chain.
    ///
    /// Base-lookup failure resolves to a none-value under `ignore_failures`
    /// (the filters still run); otherwise the engine's fallback string (with
    /// `%s` replaced by the dotted path) is returned and the chain is
    /// skipped. Never fails.
    pub fn resolve(&self, context: &Context, ignore_failures: bool) -> Value {
        let base = match &self.base {
            ExprAtom::Literal(v) => v.clone(),
            ExprAtom::Var(var) => match var.resolve(context) {
                Some(v) => v,
                None if ignore_failures => Value::None,
                None => {
                    return Value::Str(
                        context.string_if_invalid.replace("%s", &var.var),
                    );
                }
            },
        };
        self.apply_filters(base, context)
    }

    /// Like [`resolve`](Self::resolve), but base-lookup failure is reported
    /// as `None` so callers with their own fallback (for-loops, widthratio)
    /// can tell it apart from a legitimate none-value.
    pub(crate) fn resolve_checked(&self, context: &Context) -> Option<Value> {
        let base = self.base.resolve(context)?;
        Some(self.apply_filters(base, context))
    }

    /// Apply the filter chain to an already-resolved base value.
    pub(crate) fn apply_filters(&self, mut value: Value, context: &Context) -> Value {
        for call in &self.filters {
            let arg = call
                .arg
                .as_ref()
                .map(|a| a.resolve(context).unwrap_or(Value::None));
            let input_safe = value.is_safe();
            let autoescape = call.def.needs_autoescape && context.autoescape;
            let mut result = (call.def.func)(&value, arg.as_ref(), autoescape);
            // An is_safe filter fed safe input yields safe output.
            if call.def.safe && input_safe {
                if let Value::Str(s) = result {
                    result = Value::Safe(s);
                }
            }
            value = result;
        }
        value
    }

    /// Whether the base is the special `block.super` lookup.
    pub(crate) fn is_block_super(&self) -> bool {
        matches!(&self.base, ExprAtom::Var(v) if v.path == ["block", "super"])
    }

    pub(crate) fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|c| c.name.as_str())
    }
}

/// Byte cursor over one expression string.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remainder_error(&self, line: usize) -> SyntaxError {
        SyntaxError::new(
            format!(
                "Could not parse the remainder: '{}' from '{}'",
                &self.text[self.pos..],
                self.text
            ),
            line,
        )
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        self.text[start..self.pos].to_string()
    }

    /// Parse one literal or lookup. Returns `None` on malformed input; the
    /// caller reports the unparsed remainder.
    fn parse_atom(&mut self) -> Option<ExprAtom> {
        let rest = &self.text[self.pos..];
        let first = rest.chars().next()?;

        // Translation-marked literal: _("...") — recognized, not translated.
        if rest.starts_with("_(") {
            self.pos += 2;
            let s = self.parse_quoted()?;
            if !self.eat(')') {
                return None;
            }
            return Some(ExprAtom::Literal(Value::Str(s)));
        }

        if first == '\'' || first == '"' {
            let s = self.parse_quoted()?;
            return Some(ExprAtom::Literal(Value::Str(s)));
        }

        if first.is_ascii_digit() || first == '-' || first == '.' {
            return self.parse_number();
        }

        // Dotted lookup.
        let mut path = Vec::new();
        loop {
            let segment = self.parse_ident();
            if segment.is_empty() {
                return None;
            }
            if segment.starts_with('_') {
                return None;
            }
            path.push(segment);
            if !self.eat('.') {
                break;
            }
        }
        let var = path.join(".");
        Some(ExprAtom::Var(Variable { path, var }))
    }

    /// Parse a quoted string with backslash escapes, cursor on the opening
    /// quote. Returns `None` if unterminated.
    fn parse_quoted(&mut self) -> Option<String> {
        let quote = self.peek()?;
        self.pos += quote.len_utf8();
        let mut out = String::new();
        let mut escaped = false;
        while let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
            if escaped {
                out.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                return Some(out);
            } else {
                out.push(ch);
            }
        }
        None
    }

    /// Permissive number parse: try integer first, then float, retaining
    /// the numeric type for filters that care.
    fn parse_number(&mut self) -> Option<ExprAtom> {
        let start = self.pos;
        let mut prev = '\0';
        while let Some(ch) = self.peek() {
            let is_number_char = ch.is_ascii_digit()
                || ch == '.'
                || ch == 'e'
                || ch == 'E'
                || ((ch == '+' || ch == '-')
                    && (prev == 'e' || prev == 'E' || self.pos == start));
            if !is_number_char {
                break;
            }
            prev = ch;
            self.pos += ch.len_utf8();
        }
        let raw = &self.text[start..self.pos];
        if let Ok(n) = raw.parse::<i64>() {
            return Some(ExprAtom::Literal(Value::Int(n)));
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Some(ExprAtom::Literal(Value::Float(n)));
        }
        None
    }
}
