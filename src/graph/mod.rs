//! Dataflow analyses over an expression graph.

mod dependency;
mod dominator;
mod indexed;
mod pattern;
mod registry;

pub use dependency::DependencyGraph;
pub use dominator::{DomNode, DominatorTree};
pub use indexed::{Edge, IndexedForwardGraph, Node};
pub use pattern::OpPattern;
pub use registry::PatternRegistry;
