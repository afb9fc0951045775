//! Layered context and render-pass state
//!
//! This module provides the two parallel runtime stacks:
//! - [`Context`]: the user-visible name→value frames with push/pop
//!   discipline. Frame 0 holds process-wide builtins (`True`, `False`,
//!   `None`) and is never popped.
//! - [`RenderContext`]: node-private, render-pass-scoped state (cycle
//!   cursors, ifchanged memory, the block-override table) keyed by node
//!   identity so same-named constructs never collide. Reset per top-level
//!   render; invisible to templates.
//!
//! [`BlockContext`] is the per-render block-override arena used by template
//! inheritance; it replaces any direct node-to-node back references.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use super::value::Value;
use crate::engine::Template;
use crate::render::node::{NodeId, NodeList};

fn builtins_frame() -> FxHashMap<String, Value> {
    let mut frame = FxHashMap::default();
    frame.insert("True".to_string(), Value::Bool(true));
    frame.insert("False".to_string(), Value::Bool(false));
    frame.insert("None".to_string(), Value::None);
    frame
}

/// The stack of user-data frames a template renders against.
///
/// Lookups search frames innermost-to-outermost. The stack always holds at
/// least the builtins frame plus one working frame.
#[derive(Debug, Clone)]
pub struct Context {
    dicts: Vec<FxHashMap<String, Value>>,
    /// Whether variable output is HTML-escaped. Defaults to on.
    pub autoescape: bool,
    pub(crate) string_if_invalid: String,
    pub(crate) debug: bool,
    pub(crate) render_context: RenderContext,
}

impl Context {
    pub fn new() -> Self {
        Context {
            dicts: vec![builtins_frame(), FxHashMap::default()],
            autoescape: true,
            string_if_invalid: String::new(),
            debug: false,
            render_context: RenderContext::new(),
        }
    }

    pub fn with_autoescape(autoescape: bool) -> Self {
        let mut context = Context::new();
        context.autoescape = autoescape;
        context
    }

    /// Bind a name in the innermost frame.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let top = self
            .dicts
            .last_mut()
            .expect("context stack always holds the builtins frame");
        top.insert(name.into(), value.into());
    }

    /// Look a name up, innermost frame first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.dicts.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Isolated lookup: search only the innermost frame.
    pub fn get_current(&self, name: &str) -> Option<&Value> {
        self.dicts.last().and_then(|frame| frame.get(name))
    }

    /// Write to the nearest frame that already defines `name`, falling back
    /// to the innermost frame. Used by named cycles.
    pub(crate) fn set_upward(&mut self, name: &str, value: Value) {
        for frame in self.dicts.iter_mut().rev() {
            if frame.contains_key(name) {
                frame.insert(name.to_string(), value);
                return;
            }
        }
        self.set(name, value);
    }

    /// Push an empty frame.
    pub fn push(&mut self) {
        self.dicts.push(FxHashMap::default());
    }

    /// Push a pre-filled frame.
    pub(crate) fn push_frame(&mut self, frame: FxHashMap<String, Value>) {
        self.dicts.push(frame);
    }

    /// Pop the innermost frame.
    ///
    /// # Panics
    ///
    /// Popping the builtins frame is a programmer error and panics.
    pub fn pop(&mut self) {
        if self.dicts.len() <= 1 {
            panic!("cannot pop the builtins frame off the context stack");
        }
        self.dicts.pop();
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl From<FxHashMap<String, Value>> for Context {
    fn from(frame: FxHashMap<String, Value>) -> Self {
        let mut context = Context::new();
        context.dicts.pop();
        context.dicts.push(frame);
        context
    }
}

impl From<serde_json::Value> for Context {
    fn from(json: serde_json::Value) -> Self {
        match Value::from(json) {
            Value::Map(map) => Context::from(map),
            _ => Context::new(),
        }
    }
}

/// A reference to a named block's body, shared between the owning template
/// tree and the per-render override chains.
#[derive(Debug, Clone)]
pub(crate) struct BlockRef {
    pub(crate) name: String,
    pub(crate) nodelist: Rc<NodeList>,
}

/// Per-render block-override chains for template inheritance.
///
/// Each `extends` encountered during a render pushes its template's blocks
/// at the *front* of the per-name chain (the leaf template's extends renders
/// first, so child overrides end up at the back, where `pop` takes them).
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockContext {
    blocks: FxHashMap<String, Vec<BlockRef>>,
}

impl BlockContext {
    pub(crate) fn add_blocks(&mut self, blocks: FxHashMap<String, BlockRef>) {
        for (name, block) in blocks {
            self.blocks.entry(name).or_default().insert(0, block);
        }
    }

    /// Take the most-derived remaining override for `name`.
    pub(crate) fn pop(&mut self, name: &str) -> Option<BlockRef> {
        self.blocks.get_mut(name).and_then(|chain| chain.pop())
    }

    /// Restore a popped override so sibling uses of the block name (e.g.
    /// the same block rendered inside a loop) see the full chain again.
    pub(crate) fn push(&mut self, name: &str, block: BlockRef) {
        self.blocks.entry(name.to_string()).or_default().push(block);
    }
}

/// Per-(node, loop-instance) memory for `ifchanged`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChangedState {
    Text(String),
    Values(Vec<Value>),
}

/// Node-private state for one render pass.
///
/// All keys are compile-time [`NodeId`]s (unique per engine), so unrelated
/// tags that happen to share a variable name cannot collide, and state from
/// included templates stays distinct from the including template's.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub(crate) cycles: FxHashMap<NodeId, usize>,
    pub(crate) ifchanged: FxHashMap<(NodeId, usize), ChangedState>,
    pub(crate) block_context: BlockContext,
    /// Whether an `extends` has populated the block context this pass;
    /// gates `block.super` (a usage error in a template rendered directly).
    pub(crate) inheritance_active: bool,
    /// Names of blocks currently rendering, innermost last. The flag records
    /// whether the block was entered with an active inheritance chain, which
    /// gates `block.super`.
    pub(crate) active_blocks: Vec<(String, bool)>,
    /// Serial numbers of the loops currently executing, innermost last.
    /// `ifchanged` keys its state to the innermost serial so re-entering a
    /// loop resets the memory.
    pub(crate) loop_serials: Vec<usize>,
    pub(crate) next_loop_serial: usize,
    /// Compiled targets of `include` tags, cached for the render pass.
    pub(crate) includes: FxHashMap<String, Rc<Template>>,
}

/// Saved render state around an included template, so a sub-template's
/// inheritance and per-node state cannot leak into the including render.
pub(crate) struct RenderScope {
    cycles: FxHashMap<NodeId, usize>,
    ifchanged: FxHashMap<(NodeId, usize), ChangedState>,
    block_context: BlockContext,
    inheritance_active: bool,
    active_blocks: Vec<(String, bool)>,
    loop_serials: Vec<usize>,
}

impl RenderContext {
    pub(crate) fn new() -> Self {
        RenderContext::default()
    }

    /// Enter an isolated scope for a sub-template render. The include cache
    /// and the loop-serial counter deliberately survive.
    pub(crate) fn isolate(&mut self) -> RenderScope {
        RenderScope {
            cycles: std::mem::take(&mut self.cycles),
            ifchanged: std::mem::take(&mut self.ifchanged),
            block_context: std::mem::take(&mut self.block_context),
            inheritance_active: std::mem::take(&mut self.inheritance_active),
            active_blocks: std::mem::take(&mut self.active_blocks),
            loop_serials: std::mem::take(&mut self.loop_serials),
        }
    }

    pub(crate) fn restore(&mut self, scope: RenderScope) {
        self.cycles = scope.cycles;
        self.ifchanged = scope.ifchanged;
        self.block_context = scope.block_context;
        self.inheritance_active = scope.inheritance_active;
        self.active_blocks = scope.active_blocks;
        self.loop_serials = scope.loop_serials;
    }
}
