//! # Introduction
//!
//! rango compiles Django-style template text into an immutable node tree
//! and renders that tree against a layered data context, producing
//! deterministic, HTML-escaped output.
//!
//! ## Rendering pipeline
//!
//! ```text
//! Source → Lexer → Tokens → Tag parser → Node tree → Renderer → String
//! ```
//!
//! 1. [`parser`] — tokenises the source and builds the node tree,
//!    dispatching `{% ... %}` tags to registered compiler callbacks and
//!    compiling `{{ ... }}` expressions through the filter grammar.
//! 2. [`render`] — walks the tree in document order against a context,
//!    resolving inheritance (`extends`/`block`/`include`) through
//!    per-render block-override chains.
//! 3. [`context`] — the runtime state model: tagged [`context::Value`]s in
//!    a stack of name→value frames, plus the render-pass-private
//!    [`context::RenderContext`].
//! 4. [`engine`] — the owning [`Engine`]: template sources, compile cache,
//!    options, and the `{% load %}`-able [`library::Library`] registries.
//!
//! ## Supported template subset
//!
//! Variables with filter chains (`{{ user.name|upper }}`), boolean
//! conditions (`{% if a and not b in c %}`), loops with unpacking and
//! `forloop` metadata, scoped assignment (`with`), output transformation
//! (`filter`, `autoescape`), cycles, `ifchanged`, `firstof`, `widthratio`,
//! verbatim and comment blocks, and full template inheritance with
//! `{{ block.super }}`.
//!
//! ## Quick start
//!
//! ```
//! use rango::{render, Context};
//!
//! let mut context = Context::new();
//! context.set("name", "<world>");
//! let out = render("Hello {{ name }}!", &mut context).unwrap();
//! assert_eq!(out, "Hello &lt;world&gt;!");
//! ```
//!
//! ## Template inheritance
//!
//! ```
//! use rango::{Engine, Options};
//!
//! let engine = Engine::new(
//!     [
//!         ("base", "A {% block c %}default{% endblock %} B"),
//!         ("page", "{% extends 'base' %}{% block c %}X{% endblock %}"),
//!     ],
//!     Options::default(),
//! )
//! .unwrap();
//! let mut context = engine.make_context();
//! let out = engine.render_to_string("page", &mut context).unwrap();
//! assert_eq!(out, "A X B");
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod filters;
pub mod library;
pub mod parser;
pub mod render;
pub mod tags;

// Re-export the types most callers need.
pub use context::{Callable, Context, Value};
pub use engine::{render, render_with, Engine, Options, Template};
pub use error::{ConfigError, RenderError, Snippet, SyntaxError, TemplateError};
pub use filters::{ArgPolicy, FilterDef};
pub use library::Library;
pub use render::{Node, NodeList, Render};
