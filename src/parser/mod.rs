//! Template compilation front end
//!
//! This module transforms template source text into a render-node tree:
//! - [`lexer`]: tokenization (source text → TEXT/VARIABLE/BLOCK/COMMENT
//!   tokens).
//! - [`parser`]: the tag parser (tokens → node tree, via registered tag
//!   compilers).
//! - [`expressions`]: the variable-and-filter-chain grammar used by
//!   `{{ ... }}` and tag arguments.
//! - [`conditions`]: the operator-precedence boolean grammar used by
//!   `{% if %}`.
//!
//! Hand-written recursive descent throughout; no parser generator.
//! Compilation is strict: every error here is fatal, carries the offending
//! token's line, and (in debug mode) a source snippet.

pub mod conditions;
pub mod expressions;
pub mod lexer;
pub mod parser;

pub use expressions::{FilterExpression, Variable};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{Parser, TagFn};
