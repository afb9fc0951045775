//! `{% for %}` evaluation
//!
//! The sequence expression is resolved once per loop entry. A missing or
//! none sequence iterates zero times, a list iterates its elements, a map
//! iterates `[key, value]` pairs sorted by key (map iteration order must be
//! deterministic), and any other scalar is coerced to a one-element list.
//!
//! Each iteration exposes a `forloop` scope with `counter`, `counter0`,
//! `revcounter`, `revcounter0`, `first`, `last`, and — inside a nested loop
//! — `parentloop` holding the enclosing loop's scope.

use rustc_hash::FxHashMap;

use crate::context::stack::Context;
use crate::context::value::Value;
use crate::engine::Engine;
use crate::error::RenderError;
use crate::parser::expressions::FilterExpression;
use crate::render::node::NodeList;

pub struct ForNode {
    pub(crate) loopvars: Vec<String>,
    pub(crate) sequence: FilterExpression,
    pub(crate) reversed: bool,
    pub(crate) body: NodeList,
    pub(crate) empty: Option<NodeList>,
    pub(crate) line: usize,
}

impl ForNode {
    pub(crate) fn render(
        &self,
        context: &mut Context,
        engine: &Engine,
    ) -> Result<String, RenderError> {
        let resolved = self.sequence.resolve_checked(context);
        let mut values = sequence_items(resolved);
        if self.reversed {
            values.reverse();
        }

        if values.is_empty() {
            return match &self.empty {
                Some(empty) => empty.render(context, engine),
                None => Ok(String::new()),
            };
        }

        // The enclosing loop's scope, captured before our frame goes up.
        let parent_loop = context.get("forloop").cloned();
        let len = values.len();

        let serial = context.render_context.next_loop_serial;
        context.render_context.next_loop_serial += 1;
        context.render_context.loop_serials.push(serial);
        context.push();

        let mut out = String::new();
        let mut failure = None;
        for (i, item) in values.into_iter().enumerate() {
            let mut forloop = FxHashMap::default();
            forloop.insert("counter".to_string(), Value::Int(i as i64 + 1));
            forloop.insert("counter0".to_string(), Value::Int(i as i64));
            forloop.insert("revcounter".to_string(), Value::Int((len - i) as i64));
            forloop.insert(
                "revcounter0".to_string(),
                Value::Int((len - i - 1) as i64),
            );
            forloop.insert("first".to_string(), Value::Bool(i == 0));
            forloop.insert("last".to_string(), Value::Bool(i == len - 1));
            if let Some(parent) = &parent_loop {
                forloop.insert("parentloop".to_string(), parent.clone());
            }
            context.set("forloop", Value::Map(forloop));

            if let Err(err) = self.bind_loopvars(context, item) {
                failure = Some(err);
                break;
            }

            match self.body.render(context, engine) {
                Ok(text) => out.push_str(&text),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        context.pop();
        context.render_context.loop_serials.pop();

        match failure {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Bind the declared loop variables, positionally unpacking when more
    /// than one was declared. Arity mismatch is a fatal render error.
    fn bind_loopvars(&self, context: &mut Context, item: Value) -> Result<(), RenderError> {
        if self.loopvars.len() == 1 {
            context.set(self.loopvars[0].clone(), item);
            return Ok(());
        }
        match item {
            Value::List(parts) if parts.len() == self.loopvars.len() => {
                for (name, part) in self.loopvars.iter().zip(parts) {
                    context.set(name.clone(), part);
                }
                Ok(())
            }
            Value::List(parts) => Err(RenderError::UnpackMismatch {
                expected: self.loopvars.len(),
                got: parts.len(),
                line: self.line,
            }),
            _ => Err(RenderError::UnpackMismatch {
                expected: self.loopvars.len(),
                got: 1,
                line: self.line,
            }),
        }
    }
}

/// Coerce a resolved sequence value into the items to iterate.
fn sequence_items(resolved: Option<Value>) -> Vec<Value> {
    match resolved {
        None | Some(Value::None) => Vec::new(),
        Some(Value::List(items)) => items,
        Some(Value::Map(map)) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| {
                    let value = map[&k].clone();
                    Value::List(vec![Value::Str(k), value])
                })
                .collect()
        }
        Some(scalar) => vec![scalar],
    }
}
