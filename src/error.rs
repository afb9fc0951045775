//! Error types for template compilation and rendering
//!
//! Three families, mirroring when they can occur:
//! - [`SyntaxError`]: compile-time failures. Always fatal to compilation.
//! - [`RenderError`]: structural runtime failures (bad unpack arity, missing
//!   include target, `block.super` outside a block). Missing variables are
//!   *not* errors; they degrade to the engine's fallback string.
//! - [`ConfigError`]: engine misconfiguration, raised at construction.
//!
//! [`TemplateError`] is the public umbrella returned by the engine entry
//! points.

use std::fmt;
use thiserror::Error;

/// A window of template source around an error, built in debug mode.
///
/// `before`/`during`/`after` split the surrounding lines at the offending
/// token, so callers can highlight exactly the text that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub line: usize,
    pub before: String,
    pub during: String,
    pub after: String,
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "near line {}: {}-->{}<--{}",
            self.line, self.before, self.during, self.after
        )
    }
}

/// Compile-time template error.
///
/// Carries the line of the offending token and, when the engine runs in
/// debug mode, a [`Snippet`] of the surrounding source.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    /// Byte range of the offending token, when the span-recording lexer ran.
    pub(crate) span: Option<(usize, usize)>,
    pub snippet: Option<Snippet>,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, line: usize) -> Self {
        SyntaxError {
            message: message.into(),
            line,
            span: None,
            snippet: None,
        }
    }

    pub(crate) fn with_span(mut self, span: Option<(usize, usize)>) -> Self {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Template syntax error on line {}: {}",
            self.line, self.message
        )?;
        if let Some(snippet) = &self.snippet {
            write!(f, " ({})", snippet)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// Runtime rendering error.
///
/// Every variant carries the operative names and numbers so the message is
/// self-contained; `line` points back at the originating tag's token.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Need {expected} values to unpack in for loop; got {got} (line {line})")]
    UnpackMismatch {
        expected: usize,
        got: usize,
        line: usize,
    },

    #[error("template does not exist: {name}")]
    TemplateNotFound { name: String },

    #[error("Invalid template reference in '{tag}' tag on line {line}")]
    BadTemplateReference { tag: &'static str, line: usize },

    #[error("widthratio arguments must be numeric (line {line})")]
    NonNumericWidthRatio { line: usize },

    #[error(
        "'block.super' is only available inside a block of an inheriting template (line {line})"
    )]
    SuperOutsideBlock { line: usize },

    #[error("{message}")]
    Custom {
        message: String,
        line: Option<usize>,
    },

    /// An error raised while loading or rendering a referenced template
    /// (the target of an `include` or `extends`).
    #[error(transparent)]
    Nested(Box<TemplateError>),
}

impl RenderError {
    /// A free-form error for externally registered tags.
    pub fn custom(message: impl Into<String>) -> Self {
        RenderError::Custom {
            message: message.into(),
            line: None,
        }
    }

    /// The template line this error originated on, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            RenderError::UnpackMismatch { line, .. }
            | RenderError::BadTemplateReference { line, .. }
            | RenderError::NonNumericWidthRatio { line }
            | RenderError::SuperOutsideBlock { line } => Some(*line),
            RenderError::Custom { line, .. } => *line,
            RenderError::TemplateNotFound { .. } | RenderError::Nested(_) => None,
        }
    }

    pub(crate) fn locate(mut self, at: usize) -> Self {
        if let RenderError::Custom { line, .. } = &mut self {
            if line.is_none() {
                *line = Some(at);
            }
        }
        self
    }
}

/// Engine construction error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("template library '{label}' is registered more than once")]
    DuplicateLibrary { label: String },
}

/// Umbrella error returned by the public compile/render entry points.
#[derive(Debug)]
pub enum TemplateError {
    Syntax(SyntaxError),

    Render {
        error: RenderError,
        snippet: Option<Snippet>,
    },

    DoesNotExist {
        name: String,
    },

    Config(ConfigError),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Syntax(err) => write!(f, "{}", err),
            TemplateError::Render { error, snippet } => {
                write!(f, "{}", error)?;
                if let Some(snippet) = snippet {
                    write!(f, " ({})", snippet)?;
                }
                Ok(())
            }
            TemplateError::DoesNotExist { name } => {
                write!(f, "template does not exist: {}", name)
            }
            TemplateError::Config(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<SyntaxError> for TemplateError {
    fn from(err: SyntaxError) -> Self {
        TemplateError::Syntax(err)
    }
}

impl From<ConfigError> for TemplateError {
    fn from(err: ConfigError) -> Self {
        TemplateError::Config(err)
    }
}

impl From<RenderError> for TemplateError {
    fn from(error: RenderError) -> Self {
        TemplateError::Render {
            error,
            snippet: None,
        }
    }
}
