//! Template inheritance: `extends`, `block`, `include`
//!
//! Inheritance is resolved per render pass through the block-override
//! arena in [`RenderContext`](crate::context::RenderContext), never through
//! node-to-node references:
//!
//! 1. Each `extends` rendered pushes its own template's block map into the
//!    BlockContext (leaf template first, so child overrides shadow parent
//!    defaults) and, when the resolved parent is a chain root, the root's
//!    own blocks too.
//! 2. Rendering then proceeds through the parent's node tree in the same
//!    context.
//! 3. A `block` pops the most-derived override off its name's chain (or
//!    falls back to its own body), renders it, and pushes the override back
//!    so sibling uses of the name — the same block inside a loop — see the
//!    full chain again.
//! 4. `{{ block.super }}` repeats the pop/render/push dance one level
//!    deeper, yielding the next-outer definition.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::context::stack::{BlockRef, Context};
use crate::context::value::Value;
use crate::engine::{Engine, Template};
use crate::error::RenderError;
use crate::parser::expressions::FilterExpression;
use crate::render::node::{Node, NodeList};

/// `{% block name %}...{% endblock %}`.
pub struct BlockNode {
    pub(crate) name: String,
    pub(crate) nodelist: Rc<NodeList>,
    pub(crate) line: usize,
}

impl BlockNode {
    pub(crate) fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let bound = context.render_context.inheritance_active;
        let popped = context.render_context.block_context.pop(&self.name);
        let nodelist = popped
            .as_ref()
            .map(|block| block.nodelist.clone())
            .unwrap_or_else(|| self.nodelist.clone());

        context.push();
        context
            .render_context
            .active_blocks
            .push((self.name.clone(), bound));
        let result = nodelist.render(context, engine);
        context.render_context.active_blocks.pop();
        if let Some(block) = popped {
            context.render_context.block_context.push(&self.name, block);
        }
        context.pop();
        result
    }
}

/// Render the next-outer definition of the innermost active block, for
/// `{{ block.super }}`. Returns empty at the bottom of the chain.
pub(crate) fn render_block_super(
    context: &mut Context,
    engine: &Engine,
) -> Result<String, RenderError> {
    let name = match context.render_context.active_blocks.last() {
        Some((name, _)) => name.clone(),
        None => return Ok(String::new()),
    };
    match context.render_context.block_context.pop(&name) {
        Some(block) => {
            context
                .render_context
                .active_blocks
                .push((name.clone(), true));
            let result = block.nodelist.render(context, engine);
            context.render_context.active_blocks.pop();
            context.render_context.block_context.push(&name, block);
            result
        }
        None => Ok(String::new()),
    }
}

/// `{% extends parent %}`: must be the template's first non-text node.
///
/// The block map is collected from the rest of the template at compile
/// time; rendering resolves the parent (a literal name, a variable holding
/// a name, or a variable holding a compiled template) and delegates to its
/// tree.
pub struct ExtendsNode {
    pub(crate) parent: FilterExpression,
    pub(crate) blocks: FxHashMap<String, BlockRef>,
    pub(crate) line: usize,
}

impl ExtendsNode {
    pub(crate) fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let parent = self.find_parent(context, engine)?;

        context.render_context.inheritance_active = true;
        context
            .render_context
            .block_context
            .add_blocks(self.blocks.clone());

        // When the parent is the chain root, its own (un-overridden) blocks
        // bottom the chains out. A parent that extends further registers
        // its blocks when its own extends node renders.
        if !matches!(parent.nodelist.first_nontext(), Some(Node::Extends(_))) {
            let mut root_blocks = FxHashMap::default();
            parent.nodelist.collect_block_refs(&mut root_blocks);
            context.render_context.block_context.add_blocks(root_blocks);
        }

        // Enter the parent's tree directly; the active template binding
        // (engine, debug state) stays as-is.
        parent.nodelist.render(context, engine)
    }

    fn find_parent(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<Rc<Template>, RenderError> {
        match self.parent.resolve_checked(context) {
            Some(Value::Str(name)) | Some(Value::Safe(name)) => engine
                .get_template(&name)
                .map_err(|err| RenderError::Nested(Box::new(err))),
            Some(Value::Template(template)) => Ok(template),
            _ => Err(RenderError::BadTemplateReference {
                tag: "extends",
                line: self.line,
            }),
        }
    }
}

/// `{% include template [with a=x b=y] [only] %}`.
pub struct IncludeNode {
    pub(crate) template: FilterExpression,
    pub(crate) extra: Vec<(String, FilterExpression)>,
    pub(crate) isolated: bool,
    pub(crate) line: usize,
}

impl IncludeNode {
    pub(crate) fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let template = self.resolve_template(context, engine)?;

        let mut frame = FxHashMap::default();
        for (name, expr) in &self.extra {
            frame.insert(name.clone(), expr.resolve(context, false));
        }

        if self.isolated {
            // `only`: a fresh context seeded with just the bindings (and
            // the builtins frame), sharing nothing else with the caller.
            let mut sub = Context::with_autoescape(context.autoescape);
            sub.string_if_invalid = context.string_if_invalid.clone();
            sub.debug = context.debug;
            sub.push_frame(frame);
            template.nodelist.render(&mut sub, engine)
        } else {
            // The included template renders against the current data
            // context, but its node-private state (inheritance chains,
            // cycle cursors) is scoped to the inclusion.
            let scope = context.render_context.isolate();
            context.push_frame(frame);
            let result = template.nodelist.render(context, engine);
            context.pop();
            context.render_context.restore(scope);
            result
        }
    }

    fn resolve_template(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<Rc<Template>, RenderError> {
        match self.template.resolve_checked(context) {
            Some(Value::Str(name)) | Some(Value::Safe(name)) => {
                if let Some(cached) = context.render_context.includes.get(&name) {
                    return Ok(cached.clone());
                }
                let template = engine
                    .get_template(&name)
                    .map_err(|err| RenderError::Nested(Box::new(err)))?;
                context
                    .render_context
                    .includes
                    .insert(name, template.clone());
                Ok(template)
            }
            Some(Value::Template(template)) => Ok(template),
            _ => Err(RenderError::BadTemplateReference {
                tag: "include",
                line: self.line,
            }),
        }
    }
}
