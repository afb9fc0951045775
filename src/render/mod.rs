//! Node-tree evaluation
//!
//! The interpreter half of the engine: a compiled template's node tree is
//! walked in document order against a [`Context`](crate::context::Context),
//! each node contributing its rendered text.
//!
//! - [`node`]: node variants, [`node::NodeList`], and the [`node::Render`]
//!   extension trait.
//! - [`loops`]: `{% for %}` evaluation.
//! - [`conditional`]: `{% ifchanged %}` evaluation.
//! - [`inheritance`]: `extends`/`block`/`include` and the block-override
//!   resolution algorithm.

pub mod conditional;
pub mod inheritance;
pub mod loops;
pub mod node;

pub use node::{Node, NodeList, Render};
