//! Render-node tree definitions and the shared render contract
//!
//! The compiled form of a template is a [`NodeList`] of [`Node`] variants.
//! Built-in node kinds form a closed enum with an exhaustive render
//! dispatch; externally registered tags plug in through the one open
//! variant, [`Node::External`], which boxes anything implementing
//! [`Render`].
//!
//! Rendering must be side-effect-free on the tree itself: nodes never
//! mutate themselves, and all per-render state lives in the context stacks
//! passed in. This is what makes a compiled template reusable across
//! renders.

use rustc_hash::FxHashMap;
use std::fmt;

use crate::context::stack::{BlockRef, Context};
use crate::context::value::Value;
use crate::engine::Engine;
use crate::error::RenderError;
use crate::parser::conditions::Condition;
use crate::parser::expressions::FilterExpression;

/// Unique identifier for nodes with per-render state, allocated at compile
/// time. Render-pass state is keyed by this identity, not by any name.
pub type NodeId = usize;

/// The render contract every node implements, and the extension point for
/// externally registered tags.
pub trait Render {
    fn render(&self, context: &mut Context, engine: &Engine)
        -> Result<String, RenderError>;
}

/// An ordered sequence of nodes.
///
/// Tracks whether a non-text node has been appended, which is how the
/// parser enforces tags that must come first (`extends`).
#[derive(Default)]
pub struct NodeList {
    pub(crate) nodes: Vec<Node>,
    pub(crate) contains_nontext: bool,
}

impl fmt::Debug for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeList(len={})", self.nodes.len())
    }
}

impl NodeList {
    pub fn new() -> Self {
        NodeList::default()
    }

    pub fn push(&mut self, node: Node) {
        if !matches!(node, Node::Text(_)) {
            self.contains_nontext = true;
        }
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render all nodes in document order, concatenating their output.
    /// In debug mode, errors from external nodes are annotated with the
    /// originating node's line.
    pub fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node.render(context, engine) {
                Ok(text) => out.push_str(&text),
                Err(err) => {
                    return Err(if context.debug {
                        err.locate(node.line())
                    } else {
                        err
                    });
                }
            }
        }
        Ok(out)
    }

    /// Concatenated literal text, for bodies the lexer forced to TEXT.
    pub(crate) fn text_content(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            if let Node::Text(t) = node {
                out.push_str(&t.text);
            }
        }
        out
    }

    /// Collect every named block in this tree (recursively), keyed by name.
    /// Used by `extends` to build its override map.
    pub(crate) fn collect_block_refs(&self, map: &mut FxHashMap<String, BlockRef>) {
        for node in &self.nodes {
            if let Node::Block(block) = node {
                map.insert(
                    block.name.clone(),
                    BlockRef {
                        name: block.name.clone(),
                        nodelist: block.nodelist.clone(),
                    },
                );
            }
            for child in node.child_nodelists() {
                child.collect_block_refs(map);
            }
        }
    }

    /// The first non-text node, used by the inheritance resolver to decide
    /// whether a parent template is an extends-chain root.
    pub(crate) fn first_nontext(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| !matches!(n, Node::Text(_)))
    }
}

/// All built-in render-node variants, plus the open [`Node::External`]
/// extension point.
pub enum Node {
    Text(TextNode),
    Variable(VariableNode),
    If(IfNode),
    For(super::loops::ForNode),
    With(WithNode),
    Filter(FilterNode),
    Autoescape(AutoescapeNode),
    Cycle(CycleNode),
    ResetCycle(ResetCycleNode),
    IfChanged(super::conditional::IfChangedNode),
    Firstof(FirstofNode),
    Widthratio(WidthratioNode),
    Verbatim(VerbatimNode),
    Comment(CommentNode),
    Load(LoadNode),
    Block(super::inheritance::BlockNode),
    Extends(super::inheritance::ExtendsNode),
    Include(super::inheritance::IncludeNode),
    /// A tag compiler may return several nodes at once.
    Fragment(NodeList),
    External(ExternalNode),
}

impl Node {
    pub(crate) fn text(text: String) -> Node {
        Node::Text(TextNode { text })
    }

    pub(crate) fn variable(expr: FilterExpression, line: usize) -> Node {
        Node::Variable(VariableNode { expr, line })
    }

    /// Only `extends` must come first in a template.
    pub(crate) fn must_be_first(&self) -> bool {
        matches!(self, Node::Extends(_))
    }

    /// The template line this node originated on (0 where untracked).
    pub fn line(&self) -> usize {
        match self {
            Node::Text(_)
            | Node::Verbatim(_)
            | Node::Comment(_)
            | Node::Load(_)
            | Node::Fragment(_) => 0,
            Node::Variable(n) => n.line,
            Node::If(n) => n.line,
            Node::For(n) => n.line,
            Node::With(n) => n.line,
            Node::Filter(n) => n.line,
            Node::Autoescape(n) => n.line,
            Node::Cycle(n) => n.line,
            Node::ResetCycle(n) => n.line,
            Node::IfChanged(n) => n.line,
            Node::Firstof(n) => n.line,
            Node::Widthratio(n) => n.line,
            Node::Block(n) => n.line,
            Node::Extends(n) => n.line,
            Node::Include(n) => n.line,
            Node::External(n) => n.line,
        }
    }

    /// Child node lists, for recursive walks (block collection).
    pub(crate) fn child_nodelists(&self) -> Vec<&NodeList> {
        match self {
            Node::If(n) => n.arms.iter().map(|(_, body)| body).collect(),
            Node::For(n) => {
                let mut lists = vec![&n.body];
                if let Some(empty) = &n.empty {
                    lists.push(empty);
                }
                lists
            }
            Node::With(n) => vec![&n.body],
            Node::Filter(n) => vec![&n.body],
            Node::Autoescape(n) => vec![&n.body],
            Node::IfChanged(n) => {
                let mut lists = vec![&n.body];
                if let Some(else_body) = &n.else_body {
                    lists.push(else_body);
                }
                lists
            }
            Node::Block(n) => vec![n.nodelist.as_ref()],
            Node::Fragment(list) => vec![list],
            _ => Vec::new(),
        }
    }

    pub fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        match self {
            Node::Text(n) => Ok(n.text.clone()),
            Node::Variable(n) => n.render(context, engine),
            Node::If(n) => n.render(context, engine),
            Node::For(n) => n.render(context, engine),
            Node::With(n) => n.render(context, engine),
            Node::Filter(n) => n.render(context, engine),
            Node::Autoescape(n) => n.render(context, engine),
            Node::Cycle(n) => n.render(context),
            Node::ResetCycle(n) => n.render(context),
            Node::IfChanged(n) => n.render(context, engine),
            Node::Firstof(n) => n.render(context),
            Node::Widthratio(n) => n.render(context),
            Node::Verbatim(n) => Ok(n.content.clone()),
            Node::Comment(_) | Node::Load(_) => Ok(String::new()),
            Node::Block(n) => n.render(context, engine),
            Node::Extends(n) => n.render(context, engine),
            Node::Include(n) => n.render(context, engine),
            Node::Fragment(list) => list.render(context, engine),
            Node::External(n) => n.node.render(context, engine),
        }
    }
}

/// Literal template text; renders unchanged.
pub struct TextNode {
    pub text: String,
}

/// `{{ expr }}`: resolve, stringify, escape per the autoescape flag unless
/// the value carries a safe-mark.
pub struct VariableNode {
    pub(crate) expr: FilterExpression,
    pub(crate) line: usize,
}

impl VariableNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let active_block = context
            .render_context
            .active_blocks
            .last()
            .map(|(_, bound)| *bound);
        let value = if self.expr.is_block_super() {
            match active_block {
                Some(true) => {
                    let text =
                        super::inheritance::render_block_super(context, engine)?;
                    self.expr.apply_filters(Value::Safe(text), context)
                }
                Some(false) => {
                    return Err(RenderError::SuperOutsideBlock { line: self.line });
                }
                // Outside any block, `block` is an ordinary variable.
                None => self.expr.resolve(context, false),
            }
        } else {
            self.expr.resolve(context, false)
        };
        Ok(value.output(context.autoescape))
    }
}

/// `{% if %}` arms: (condition, body) pairs, condition-less for `else`.
pub struct IfNode {
    pub(crate) arms: Vec<(Option<Condition>, NodeList)>,
    pub(crate) line: usize,
}

impl IfNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        for (condition, body) in &self.arms {
            let matched = match condition {
                Some(cond) => cond.is_true(context),
                None => true,
            };
            if matched {
                return body.render(context, engine);
            }
        }
        Ok(String::new())
    }
}

/// `{% with a=expr %}`: one scoped frame around the body.
pub struct WithNode {
    pub(crate) bindings: Vec<(String, FilterExpression)>,
    pub(crate) body: NodeList,
    pub(crate) line: usize,
}

impl WithNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let mut frame = FxHashMap::default();
        for (name, expr) in &self.bindings {
            frame.insert(name.clone(), expr.resolve(context, false));
        }
        context.push_frame(frame);
        let result = self.body.render(context, engine);
        // The frame pops whether or not the body erred.
        context.pop();
        result
    }
}

/// `{% filter chain %}`: render the body, then thread it through the chain.
pub struct FilterNode {
    pub(crate) chain: FilterExpression,
    pub(crate) body: NodeList,
    pub(crate) line: usize,
}

impl FilterNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let output = self.body.render(context, engine)?;
        context.push();
        // The body was already escaped while rendering, so it enters the
        // chain safe-marked, and the chain's result is emitted as-is.
        context.set("var", Value::Safe(output));
        let value = self.chain.resolve(context, false);
        context.pop();
        Ok(value.display_string())
    }
}

/// `{% autoescape on|off %}`: override the flag around the body.
pub struct AutoescapeNode {
    pub(crate) setting: bool,
    pub(crate) body: NodeList,
    pub(crate) line: usize,
}

impl AutoescapeNode {
    fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let saved = context.autoescape;
        context.autoescape = self.setting;
        let result = self.body.render(context, engine);
        context.autoescape = saved;
        result
    }
}

/// `{% cycle %}`: advances a per-render cursor keyed by node identity.
#[derive(Clone)]
pub struct CycleNode {
    pub(crate) id: NodeId,
    pub(crate) exprs: Vec<FilterExpression>,
    pub(crate) var_name: Option<String>,
    pub(crate) silent: bool,
    pub(crate) line: usize,
}

impl CycleNode {
    fn render(&self, context: &mut Context) -> Result<String, RenderError> {
        let cursor = context.render_context.cycles.entry(self.id).or_insert(0);
        let index = *cursor % self.exprs.len();
        *cursor += 1;
        let value = self.exprs[index].resolve(context, false);
        if let Some(name) = &self.var_name {
            context.set_upward(name, value.clone());
        }
        if self.silent {
            Ok(String::new())
        } else {
            Ok(value.output(context.autoescape))
        }
    }
}

/// `{% resetcycle %}`: force a cycle's cursor back to its first value.
pub struct ResetCycleNode {
    pub(crate) target: NodeId,
    pub(crate) line: usize,
}

impl ResetCycleNode {
    fn render(&self, context: &mut Context) -> Result<String, RenderError> {
        context.render_context.cycles.insert(self.target, 0);
        Ok(String::new())
    }
}

/// `{% firstof a b 'fallback' %}`: the first truthy argument, escaped.
pub struct FirstofNode {
    pub(crate) exprs: Vec<FilterExpression>,
    pub(crate) line: usize,
}

impl FirstofNode {
    fn render(&self, context: &mut Context) -> Result<String, RenderError> {
        for expr in &self.exprs {
            let value = expr.resolve(context, true);
            if value.is_truthy() {
                return Ok(value.output(context.autoescape));
            }
        }
        Ok(String::new())
    }
}

/// `{% widthratio value max width %}`: scaled ratio, rounded.
pub struct WidthratioNode {
    pub(crate) value: FilterExpression,
    pub(crate) max: FilterExpression,
    pub(crate) width: FilterExpression,
    pub(crate) asvar: Option<String>,
    pub(crate) line: usize,
}

impl WidthratioNode {
    fn render(&self, context: &mut Context) -> Result<String, RenderError> {
        let resolved = (
            self.value.resolve_checked(context),
            self.max.resolve_checked(context),
            self.width.resolve_checked(context),
        );
        let (value, max, width) = match resolved {
            (Some(v), Some(m), Some(w)) => (v, m, w),
            // Missing variables degrade like everywhere else.
            _ => return Ok(String::new()),
        };
        let to_number = |v: &Value| {
            v.as_number()
                .ok_or(RenderError::NonNumericWidthRatio { line: self.line })
        };
        let (value, max, width) = (to_number(&value)?, to_number(&max)?, to_number(&width)?);
        let ratio = if max == 0.0 {
            0.0
        } else {
            value / max * width
        };
        let text = (ratio.round() as i64).to_string();
        match &self.asvar {
            Some(name) => {
                context.set(name.clone(), Value::Str(text));
                Ok(String::new())
            }
            None => Ok(text),
        }
    }
}

/// The frozen body of a `{% verbatim %}` block.
pub struct VerbatimNode {
    pub(crate) content: String,
}

/// `{% comment %}`: contributes nothing to output.
pub struct CommentNode;

/// `{% load %}`: all effect is at compile time; renders nothing.
pub struct LoadNode;

/// An externally registered tag's node, carrying its origin line for
/// debug-mode error annotation.
pub struct ExternalNode {
    pub line: usize,
    pub node: Box<dyn Render>,
}
