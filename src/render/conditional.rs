//! `{% ifchanged %}` evaluation
//!
//! An ifchanged node compares either its rendered body (argument-less form)
//! or its resolved watch expressions against the value stored by its
//! previous render. The memory is keyed by the node's identity plus the
//! serial of the innermost enclosing loop instance, so nested loops reset
//! independently and state never leaks across loop restarts; outside any
//! loop the key is scoped to the render pass.

use crate::context::stack::{ChangedState, Context};
use crate::engine::Engine;
use crate::error::RenderError;
use crate::parser::expressions::FilterExpression;
use crate::render::node::{NodeId, NodeList};

pub struct IfChangedNode {
    pub(crate) id: NodeId,
    pub(crate) watch: Vec<FilterExpression>,
    pub(crate) body: NodeList,
    pub(crate) else_body: Option<NodeList>,
    pub(crate) line: usize,
}

impl IfChangedNode {
    pub(crate) fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let scope = context
            .render_context
            .loop_serials
            .last()
            .copied()
            .unwrap_or(0);
        let key = (self.id, scope);

        if self.watch.is_empty() {
            let output = self.body.render(context, engine)?;
            let state = ChangedState::Text(output.clone());
            if self.changed(context, key, state) {
                Ok(output)
            } else {
                self.render_unchanged(context, engine)
            }
        } else {
            let values: Vec<_> = self
                .watch
                .iter()
                .map(|expr| expr.resolve(context, true))
                .collect();
            let state = ChangedState::Values(values);
            if self.changed(context, key, state) {
                self.body.render(context, engine)
            } else {
                self.render_unchanged(context, engine)
            }
        }
    }

    fn changed(&self, context: &mut Context, key: (NodeId, usize), state: ChangedState) -> bool {
        let previous = context.render_context.ifchanged.get(&key);
        if previous == Some(&state) {
            false
        } else {
            context.render_context.ifchanged.insert(key, state);
            true
        }
    }

    fn render_unchanged(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        match &self.else_body {
            Some(body) => body.render(context, engine),
            None => Ok(String::new()),
        }
    }
}
