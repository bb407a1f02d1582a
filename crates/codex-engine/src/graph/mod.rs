//! Flow Graph Model: typed nodes joined by dependency edges.
//!
//! A `FlowGraph` is validated once at construction and is immutable after.
//! Every edge must reference existing nodes and every node type must be a
//! well-formed name, so planning never sees a half-valid graph.

pub mod edge;
pub mod flow;
pub mod node;

pub use edge::Edge;
pub use flow::{FlowDefinition, FlowGraph, NodeDefinition};
pub use node::{Node, NodeKind};
