//! The shared mutable plan representation: node data, the arena-backed tree
//! with its surgery primitives, a builder for constructing canonical plans,
//! and the column-mapping helpers the rewrite rules share.

mod node;
pub use node::*;
mod tree;
pub use tree::*;
mod builder;
pub use builder::*;
pub mod util;
