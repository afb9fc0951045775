//! Tag and filter registry bundles
//!
//! A [`Library`] is a named bundle of tag compilers and filters. The engine
//! carries one built-in library (always loaded) plus any number of
//! configured libraries reachable through `{% load %}`.
//!
//! Beyond raw registration, two conveniences cover the common shapes of
//! custom tags:
//! - [`Library::simple_tag`]: a plain function receiving resolved
//!   positional arguments and a keyword-argument mapping, optionally
//!   preceded by the context when it opts in.
//! - [`Library::inclusion_tag`]: additionally renders a named template
//!   against the mapping the function returns.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::context::stack::Context;
use crate::context::value::Value;
use crate::engine::Engine;
use crate::error::{RenderError, SyntaxError};
use crate::filters::FilterDef;
use crate::parser::expressions::FilterExpression;
use crate::parser::lexer::Token;
use crate::parser::parser::{Parser, TagFn};
use crate::render::node::{ExternalNode, Node, Render};

/// A bundle of tags and filters registered under one label.
#[derive(Clone, Default)]
pub struct Library {
    pub(crate) tags: FxHashMap<String, TagFn>,
    pub(crate) filters: FxHashMap<String, FilterDef>,
}

impl Library {
    pub fn new() -> Self {
        Library::default()
    }

    /// Register a tag compiler under a keyword. Re-registering a name
    /// replaces the previous entry.
    pub fn register_tag(
        &mut self,
        name: &str,
        compiler: impl Fn(&mut Parser, &Token) -> Result<Node, SyntaxError> + 'static,
    ) {
        self.tags.insert(name.to_string(), Rc::new(compiler));
    }

    /// Register a filter. Re-registering a name replaces the previous
    /// entry.
    pub fn register_filter(&mut self, name: &str, def: FilterDef) {
        self.filters.insert(name.to_string(), def);
    }

    /// Register a plain function as a tag: `{% name arg1 key=arg2 %}`
    /// resolves the arguments and outputs the function's return value,
    /// escaped per the active autoescape flag.
    pub fn simple_tag(
        &mut self,
        name: &str,
        takes_context: bool,
        func: impl Fn(Option<&Context>, &[Value], &FxHashMap<String, Value>) -> Value + 'static,
    ) {
        let func = Rc::new(func);
        self.register_tag(name, move |parser, token| {
            let bits = token.split_contents();
            let (args, kwargs) = parse_call_args(&bits[1..], parser)?;
            Ok(Node::External(ExternalNode {
                line: token.line,
                node: Box::new(SimpleTagNode {
                    func: func.clone(),
                    takes_context,
                    args,
                    kwargs,
                }),
            }))
        });
    }

    /// Register a function whose returned mapping becomes the context for
    /// rendering `template_name`; the tag outputs that render.
    pub fn inclusion_tag(
        &mut self,
        name: &str,
        template_name: &str,
        takes_context: bool,
        func: impl Fn(Option<&Context>, &[Value], &FxHashMap<String, Value>) -> FxHashMap<String, Value>
            + 'static,
    ) {
        let func = Rc::new(func);
        let template_name = template_name.to_string();
        self.register_tag(name, move |parser, token| {
            let bits = token.split_contents();
            let (args, kwargs) = parse_call_args(&bits[1..], parser)?;
            Ok(Node::External(ExternalNode {
                line: token.line,
                node: Box::new(InclusionTagNode {
                    func: func.clone(),
                    takes_context,
                    template_name: template_name.clone(),
                    args,
                    kwargs,
                }),
            }))
        });
    }
}

/// Split tag bits into positional and `name=expr` keyword arguments.
/// Positional arguments may not follow keyword arguments.
fn parse_call_args(
    bits: &[String],
    parser: &Parser,
) -> Result<(Vec<FilterExpression>, Vec<(String, FilterExpression)>), SyntaxError> {
    let mut args = Vec::new();
    let mut kwargs: Vec<(String, FilterExpression)> = Vec::new();
    for bit in bits {
        match split_kwarg(bit) {
            Some((name, expr_text)) => {
                kwargs.push((name.to_string(), parser.compile_filter(expr_text)?));
            }
            None => {
                if !kwargs.is_empty() {
                    return Err(SyntaxError::new(
                        format!(
                            "positional argument '{}' follows keyword arguments",
                            bit
                        ),
                        parser.current_line(),
                    ));
                }
                args.push(parser.compile_filter(bit)?);
            }
        }
    }
    Ok((args, kwargs))
}

/// Recognize `name=expr` where `name` is a plain identifier; an `=` inside
/// a quoted argument does not count.
fn split_kwarg(bit: &str) -> Option<(&str, &str)> {
    let (name, rest) = bit.split_once('=')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        || name.starts_with(|ch: char| ch.is_ascii_digit())
    {
        return None;
    }
    Some((name, rest))
}

struct SimpleTagNode {
    func: Rc<dyn Fn(Option<&Context>, &[Value], &FxHashMap<String, Value>) -> Value>,
    takes_context: bool,
    args: Vec<FilterExpression>,
    kwargs: Vec<(String, FilterExpression)>,
}

impl SimpleTagNode {
    fn resolve_args(&self, context: &Context) -> (Vec<Value>, FxHashMap<String, Value>) {
        let args: Vec<Value> = self
            .args
            .iter()
            .map(|expr| expr.resolve(context, true))
            .collect();
        let kwargs: FxHashMap<String, Value> = self
            .kwargs
            .iter()
            .map(|(name, expr)| (name.clone(), expr.resolve(context, true)))
            .collect();
        (args, kwargs)
    }
}

impl Render for SimpleTagNode {
    fn render(
        &self,
        context: &mut Context,
        _engine: &Engine,
    ) -> Result<String, RenderError> {
        let (args, kwargs) = self.resolve_args(context);
        let value = if self.takes_context {
            (self.func)(Some(context), &args, &kwargs)
        } else {
            (self.func)(None, &args, &kwargs)
        };
        Ok(value.output(context.autoescape))
    }
}

struct InclusionTagNode {
    func: Rc<
        dyn Fn(Option<&Context>, &[Value], &FxHashMap<String, Value>) -> FxHashMap<String, Value>,
    >,
    takes_context: bool,
    template_name: String,
    args: Vec<FilterExpression>,
    kwargs: Vec<(String, FilterExpression)>,
}

impl Render for InclusionTagNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let args: Vec<Value> = self
            .args
            .iter()
            .map(|expr| expr.resolve(context, true))
            .collect();
        let kwargs: FxHashMap<String, Value> = self
            .kwargs
            .iter()
            .map(|(name, expr)| (name.clone(), expr.resolve(context, true)))
            .collect();
        let data = if self.takes_context {
            (self.func)(Some(context), &args, &kwargs)
        } else {
            (self.func)(None, &args, &kwargs)
        };

        let template = engine
            .get_template(&self.template_name)
            .map_err(|err| RenderError::Nested(Box::new(err)))?;
        let mut sub = Context::with_autoescape(context.autoescape);
        sub.string_if_invalid = context.string_if_invalid.clone();
        sub.debug = context.debug;
        sub.push_frame(data);
        template.nodelist.render(&mut sub, engine)
    }
}
