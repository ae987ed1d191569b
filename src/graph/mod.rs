//! The scalar expression graph: node storage, leaf slots and the fluent
//! [`Scalar`] builder.

mod graph;
mod node;
mod scalar;

#[cfg(test)]
mod tests;

pub use graph::{Graph, GraphScope};
pub use node::{NodeData, NodeId, Op};
pub use scalar::{IntoScalar, Scalar};
