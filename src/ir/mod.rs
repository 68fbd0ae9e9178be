//! Intermediate representation.
//!
//! This module holds the IR definitions, the validated input tree, and
//! the tree-to-IR builder.

pub mod ast;
pub mod builder;
pub mod ir;

pub use builder::build;
pub use ir::*;
