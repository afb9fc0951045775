//! Tag parser: token stream → node tree
//!
//! This module provides the [`Parser`] struct and the core parse loop. The
//! parser consumes the lexer's token stream destructively (front-to-back
//! cursor with single-token pushback), dispatching each BLOCK token to the
//! registered tag-compiler callback for its command word. Tag compilers
//! re-enter the parser for their bodies via [`Parser::parse`] with a stop
//! set, which is how nesting works without a grammar for it.
//!
//! The parser also owns the compile-time bookkeeping the built-in tag
//! library needs: the pending-tag stack behind "unclosed tag" diagnostics,
//! the merged tag/filter registries (builtins plus `{% load %}`ed
//! libraries), seen block names, the seen-extends flag, the named-cycle
//! table, and the node-id allocator.

use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::rc::Rc;

use crate::error::SyntaxError;
use crate::filters::FilterDef;
use crate::library::Library;
use crate::parser::expressions::FilterExpression;
use crate::parser::lexer::{Token, TokenKind};
use crate::render::node::{Node, NodeId, NodeList};

/// A registered tag compiler: receives the live parser (for recursive
/// sub-parsing) and the triggering token (for its arguments and line).
pub type TagFn = Rc<dyn Fn(&mut Parser, &Token) -> Result<Node, SyntaxError>>;

/// Recursive-descent tag parser over a lexed token stream.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    tags: FxHashMap<String, TagFn>,
    filters: FxHashMap<String, FilterDef>,
    libraries: Rc<FxHashMap<String, Library>>,
    /// Open tags awaiting their terminators: (command, line).
    command_stack: Vec<(String, usize)>,
    /// Block names seen in this template; duplicates are compile errors.
    loaded_blocks: Vec<String>,
    pub(crate) seen_extends: bool,
    /// Named `{% cycle ... as name %}` prototypes, for reuse and resetcycle.
    pub(crate) named_cycles: FxHashMap<String, crate::render::node::CycleNode>,
    pub(crate) last_cycle: Option<NodeId>,
    ids: Rc<Cell<usize>>,
    /// Line of the token currently being compiled, for error reporting.
    cur_line: Cell<usize>,
}

impl Parser {
    pub(crate) fn new(
        tokens: Vec<Token>,
        builtins: &Library,
        libraries: Rc<FxHashMap<String, Library>>,
        ids: Rc<Cell<usize>>,
    ) -> Self {
        Parser {
            tokens,
            position: 0,
            tags: builtins.tags.clone(),
            filters: builtins.filters.clone(),
            libraries,
            command_stack: Vec::new(),
            loaded_blocks: Vec::new(),
            seen_extends: false,
            named_cycles: FxHashMap::default(),
            last_cycle: None,
            ids,
            cur_line: Cell::new(1),
        }
    }

    /// Parse until one of `stop` is reached (the terminator is pushed back
    /// for the caller to consume), or to the end of the stream when `stop`
    /// is empty.
    pub fn parse(&mut self, stop: &[&str]) -> Result<NodeList, SyntaxError> {
        let mut nodelist = NodeList::new();

        while let Some(token) = self.next_token() {
            self.cur_line.set(token.line);
            match token.kind {
                TokenKind::Text => {
                    nodelist.push(Node::text(token.contents.clone()));
                }
                TokenKind::Comment => {}
                TokenKind::Variable => {
                    if token.contents.is_empty() {
                        return Err(SyntaxError::new(
                            format!("Empty variable tag on line {}", token.line),
                            token.line,
                        )
                        .with_span(token.span));
                    }
                    let expr = self
                        .compile_filter(&token.contents)
                        .map_err(|e| e.with_span(token.span))?;
                    nodelist.push(Node::variable(expr, token.line));
                }
                TokenKind::Block => {
                    let command = match token.contents.split_whitespace().next() {
                        Some(word) => word.to_string(),
                        None => {
                            return Err(SyntaxError::new(
                                format!("Empty block tag on line {}", token.line),
                                token.line,
                            )
                            .with_span(token.span));
                        }
                    };
                    if stop.contains(&command.as_str()) {
                        self.prepend_token(token);
                        return Ok(nodelist);
                    }
                    self.command_stack.push((command.clone(), token.line));
                    let tag_fn = self.tags.get(&command).cloned().ok_or_else(|| {
                        self.invalid_block_tag(&token, &command, stop)
                    })?;
                    let node =
                        tag_fn(self, &token).map_err(|e| e.with_span(token.span))?;
                    self.append(&mut nodelist, node, &token)?;
                    self.command_stack.pop();
                }
            }
        }

        if !stop.is_empty() {
            return Err(self.unclosed_block_tag(stop));
        }
        Ok(nodelist)
    }

    /// Append a compiled node, enforcing the "must be first" invariant
    /// (`extends` is rejected once any non-text node exists).
    fn append(
        &self,
        nodelist: &mut NodeList,
        node: Node,
        token: &Token,
    ) -> Result<(), SyntaxError> {
        if node.must_be_first() && nodelist.contains_nontext {
            return Err(SyntaxError::new(
                "'extends' must be the first tag in the template",
                token.line,
            )
            .with_span(token.span));
        }
        nodelist.push(node);
        Ok(())
    }

    /// Degenerate parse for non-nestable bodies: discard tokens until a
    /// BLOCK token whose entire contents equal `end_tag`.
    pub fn skip_past(&mut self, end_tag: &str) -> Result<(), SyntaxError> {
        while let Some(token) = self.next_token() {
            if token.kind == TokenKind::Block && token.contents == end_tag {
                return Ok(());
            }
        }
        Err(self.unclosed_block_tag(&[end_tag]))
    }

    /// Pop the next token off the stream.
    pub fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Pop the next token, erroring like an unclosed tag when the stream is
    /// exhausted. For tag compilers that just called `parse(stop)` the
    /// pushed-back terminator is guaranteed, so this cannot fail there.
    pub fn next_token_required(&mut self, stop: &[&str]) -> Result<Token, SyntaxError> {
        match self.next_token() {
            Some(token) => Ok(token),
            None => Err(self.unclosed_block_tag(stop)),
        }
    }

    /// Push a token back for single-token lookahead.
    pub fn prepend_token(&mut self, token: Token) {
        debug_assert!(self.position > 0);
        self.position -= 1;
        self.tokens[self.position] = token;
    }

    /// Discard the pushed-back stop token after a `parse(stop)` call.
    pub fn delete_first_token(&mut self) {
        self.next_token();
    }

    /// Compile an expression string against the merged filter registry.
    pub fn compile_filter(&self, text: &str) -> Result<FilterExpression, SyntaxError> {
        FilterExpression::compile(text, self)
    }

    pub(crate) fn find_filter(&self, name: &str) -> Option<FilterDef> {
        self.filters.get(name).cloned()
    }

    pub(crate) fn find_library(&self, label: &str) -> Option<&Library> {
        self.libraries.get(label)
    }

    pub(crate) fn library_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.libraries.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Merge a `{% load %}`ed library into the working registries.
    pub(crate) fn add_library(&mut self, library: &Library) {
        for (name, tag) in &library.tags {
            self.tags.insert(name.clone(), tag.clone());
        }
        for (name, filter) in &library.filters {
            self.filters.insert(name.clone(), filter.clone());
        }
    }

    /// Record a `{% block %}` name; duplicates within one template body are
    /// compile errors.
    pub(crate) fn register_block(&mut self, name: &str) -> Result<(), SyntaxError> {
        if self.loaded_blocks.iter().any(|seen| seen == name) {
            return Err(SyntaxError::new(
                format!("'block' tag with name '{}' appears more than once", name),
                self.current_line(),
            ));
        }
        self.loaded_blocks.push(name.to_string());
        Ok(())
    }

    /// Allocate a node identity for tags with per-render state. Unique per
    /// engine, so state from included templates cannot collide.
    pub(crate) fn next_node_id(&self) -> NodeId {
        let id = self.ids.get();
        self.ids.set(id + 1);
        id
    }

    /// Line of the token currently being compiled.
    pub fn current_line(&self) -> usize {
        self.cur_line.get()
    }

    /// "Invalid block tag" error for an unknown command, naming the
    /// expected terminators when the parse had a stop set.
    pub(crate) fn invalid_block_tag(
        &self,
        token: &Token,
        command: &str,
        stop: &[&str],
    ) -> SyntaxError {
        let message = if stop.is_empty() {
            format!(
                "Invalid block tag on line {}: '{}'. Did you forget to register or load this tag?",
                token.line, command
            )
        } else {
            let expected: Vec<String> =
                stop.iter().map(|s| format!("'{}'", s)).collect();
            format!(
                "Invalid block tag on line {}: '{}', expected {}. Did you forget to register or load this tag?",
                token.line,
                command,
                expected.join(" or ")
            )
        };
        SyntaxError::new(message, token.line).with_span(token.span)
    }

    /// "Unclosed tag" error naming the innermost pending tag — the one
    /// whose terminator set we were scanning for.
    fn unclosed_block_tag(&self, stop: &[&str]) -> SyntaxError {
        let (command, line) = self
            .command_stack
            .last()
            .cloned()
            .unwrap_or_else(|| ("<template>".to_string(), self.current_line()));
        SyntaxError::new(
            format!(
                "Unclosed tag on line {}: '{}'. Looking for one of: {}.",
                line,
                command,
                stop.join(", ")
            ),
            line,
        )
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Parser {
        Parser::new(
            Vec::new(),
            &crate::tags::default_library(),
            Rc::new(FxHashMap::default()),
            Rc::new(Cell::new(0)),
        )
    }

    #[cfg(test)]
    pub(crate) fn from_source(source: &str) -> Parser {
        Parser::new(
            crate::parser::lexer::Lexer::new(source).tokenize(),
            &crate::tags::default_library(),
            Rc::new(FxHashMap::default()),
            Rc::new(Cell::new(0)),
        )
    }
}
