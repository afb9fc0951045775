//! Engine and compiled templates
//!
//! The [`Engine`] owns the template-source lookup table supplied at
//! construction, the compile cache, the configured options, and the tag/
//! filter registries. A [`Template`] is a compiled, immutable node tree;
//! the cache hands out `Rc<Template>` so repeated renders of a name compile
//! at most once.
//!
//! The engine is single-threaded by design: compilation and rendering are
//! plain synchronous calls, all shared structures use `Rc`/`RefCell`, and
//! one engine is meant to live on one thread. Within a render, node
//! evaluation is strictly document order.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::context::stack::{Context, RenderContext};
use crate::error::{ConfigError, Snippet, SyntaxError, TemplateError};
use crate::library::Library;
use crate::parser::lexer::Lexer;
use crate::parser::parser::Parser;
use crate::render::node::NodeList;
use crate::tags::default_library;

/// Engine configuration.
pub struct Options {
    /// HTML-escape variable output by default.
    pub autoescape: bool,
    /// Enable the span-recording lexer and source-snippet error annotation.
    pub debug: bool,
    /// Fallback text for unresolvable variables; `%s` is replaced by the
    /// variable's dotted path.
    pub string_if_invalid: String,
    /// Libraries reachable through `{% load label %}`.
    pub libraries: Vec<(String, Library)>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            autoescape: true,
            debug: false,
            string_if_invalid: String::new(),
            libraries: Vec::new(),
        }
    }
}

/// A compiled template: name, source, and the owned node tree. Immutable
/// once compiled; safe to render any number of times, each render against
/// its own context.
pub struct Template {
    pub name: Option<String>,
    pub source: String,
    pub(crate) nodelist: NodeList,
}

impl Template {
    /// Render against a context. The render-pass state is reset here, so a
    /// context can be reused across renders.
    pub fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, TemplateError> {
        context.render_context = RenderContext::new();
        context.string_if_invalid = engine.string_if_invalid.clone();
        context.debug = engine.debug;
        match self.nodelist.render(context, engine) {
            Ok(output) => Ok(output),
            Err(error) => {
                let snippet = if engine.debug {
                    error.line().and_then(|line| line_snippet(&self.source, line))
                } else {
                    None
                };
                Err(TemplateError::Render { error, snippet })
            }
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

/// The template engine: source table, cache, options, and registries.
pub struct Engine {
    sources: FxHashMap<String, String>,
    cache: RefCell<FxHashMap<String, Rc<Template>>>,
    builtins: Library,
    libraries: Rc<FxHashMap<String, Library>>,
    pub(crate) autoescape: bool,
    pub(crate) debug: bool,
    pub(crate) string_if_invalid: String,
    ids: Rc<Cell<usize>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("autoescape", &self.autoescape)
            .field("debug", &self.debug)
            .field("string_if_invalid", &self.string_if_invalid)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine over a name→source template table.
    ///
    /// Fails if two configured libraries share a label.
    pub fn new<I, K, V>(templates: I, options: Options) -> Result<Engine, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut libraries = FxHashMap::default();
        for (label, library) in options.libraries {
            if libraries.insert(label.clone(), library).is_some() {
                return Err(ConfigError::DuplicateLibrary { label });
            }
        }
        Ok(Engine {
            sources: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            cache: RefCell::new(FxHashMap::default()),
            builtins: default_library(),
            libraries: Rc::new(libraries),
            autoescape: options.autoescape,
            debug: options.debug,
            string_if_invalid: options.string_if_invalid,
            ids: Rc::new(Cell::new(0)),
        })
    }

    /// Fetch (compiling and caching on first use) the named template.
    pub fn get_template(&self, name: &str) -> Result<Rc<Template>, TemplateError> {
        if let Some(template) = self.cache.borrow().get(name) {
            return Ok(template.clone());
        }
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::DoesNotExist {
                name: name.to_string(),
            })?
            .clone();
        let template = Rc::new(self.compile(source, Some(name.to_string()))?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), template.clone());
        Ok(template)
    }

    /// Compile and render a one-off template string (not cached).
    pub fn render_template_string(
        &self,
        source: &str,
        context: &mut Context,
    ) -> Result<String, TemplateError> {
        let template = self.compile(source.to_string(), None)?;
        template.render(context, self)
    }

    /// Render the named template to a string.
    pub fn render_to_string(
        &self,
        name: &str,
        context: &mut Context,
    ) -> Result<String, TemplateError> {
        let template = self.get_template(name)?;
        template.render(context, self)
    }

    /// A fresh context honoring the engine's autoescape default.
    pub fn make_context(&self) -> Context {
        Context::with_autoescape(self.autoescape)
    }

    fn compile(&self, source: String, name: Option<String>) -> Result<Template, TemplateError> {
        let tokens = if self.debug {
            Lexer::with_spans(&source).tokenize()
        } else {
            Lexer::new(&source).tokenize()
        };
        let mut parser = Parser::new(
            tokens,
            &self.builtins,
            self.libraries.clone(),
            self.ids.clone(),
        );
        match parser.parse(&[]) {
            Ok(nodelist) => Ok(Template {
                name,
                source,
                nodelist,
            }),
            Err(err) => Err(self.annotate_syntax_error(err, &source).into()),
        }
    }

    /// In debug mode, attach a before/during/after source window to a
    /// syntax error, split at the offending token when its span is known.
    fn annotate_syntax_error(&self, mut err: SyntaxError, source: &str) -> SyntaxError {
        if !self.debug || err.snippet.is_some() {
            return err;
        }
        err.snippet = match err.span {
            Some(span) => span_snippet(source, err.line, span),
            None => line_snippet(source, err.line),
        };
        err
    }
}

const SNIPPET_CONTEXT_LINES: usize = 2;

/// Byte bounds of each line, newline excluded.
fn line_bounds(source: &str) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0;
    for (i, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            bounds.push((start, i));
            start = i + 1;
        }
    }
    bounds.push((start, source.len()));
    bounds
}

/// The byte window covering `line` plus the surrounding context lines.
fn window_bounds(source: &str, line: usize) -> Option<(usize, usize)> {
    let bounds = line_bounds(source);
    let index = line.checked_sub(1)?;
    if index >= bounds.len() {
        return None;
    }
    let first = index.saturating_sub(SNIPPET_CONTEXT_LINES);
    let last = (index + SNIPPET_CONTEXT_LINES).min(bounds.len() - 1);
    Some((bounds[first].0, bounds[last].1))
}

/// Snippet split exactly at a token's byte span.
fn span_snippet(source: &str, line: usize, span: (usize, usize)) -> Option<Snippet> {
    let (window_start, window_end) = window_bounds(source, line)?;
    let start = span.0.clamp(window_start, window_end);
    let end = span.1.clamp(start, window_end);
    Some(Snippet {
        line,
        before: source[window_start..start].to_string(),
        during: source[start..end].to_string(),
        after: source[end..window_end].to_string(),
    })
}

/// Snippet with the whole error line as the highlighted region.
fn line_snippet(source: &str, line: usize) -> Option<Snippet> {
    let bounds = line_bounds(source);
    let index = line.checked_sub(1)?;
    let (start, end) = *bounds.get(index)?;
    span_snippet(source, line, (start, end))
}

/// Stateless convenience: compile `source` against the default options and
/// render it once.
pub fn render(source: &str, context: &mut Context) -> Result<String, TemplateError> {
    render_with(
        source,
        context,
        std::iter::empty::<(String, String)>(),
        Options::default(),
    )
}

/// Stateless convenience with companion templates (targets for `extends`
/// and `include`) and options.
pub fn render_with<I, K, V>(
    source: &str,
    context: &mut Context,
    templates: I,
    options: Options,
) -> Result<String, TemplateError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let engine = Engine::new(templates, options)?;
    engine.render_template_string(source, context)
}
