//! Pathwise: batched scalar autodiff kernels
//!
//! Pathwise builds immutable graphs of scalar operations, synthesizes
//! reverse-mode derivatives as ordinary graph nodes, and compiles a chosen
//! set of outputs into a flat evaluation plan that runs over large batches
//! of inputs (e.g. Monte-Carlo sample paths).
//!
//! # Architecture
//!
//! - **graph**: the append-only node arena and the fluent [`Scalar`] builder
//! - **autograd**: reverse-mode differentiation over graph nodes
//! - **compiler**: validation, scheduling and plan emission
//! - **kernel**: the compiled artifact, invoked once per batch
//!
//! # Example
//!
//! ```
//! use pathwise::prelude::*;
//!
//! let graph = Graph::new();
//! let _scope = GraphScope::new(&graph);
//!
//! let spot = graph.input(Some("spot"));
//! let dw = graph.input(Some("dW"));
//! let vol = graph.param(0.2, Some("vol"));
//! let strike = graph.param(100.0, Some("strike"));
//!
//! let payoff = (spot * (vol * dw).exp() - strike).max(0.0);
//! let delta = payoff.grad(spot);
//!
//! let kernel = compile(
//!     &graph,
//!     &[payoff.id(), delta.id()],
//!     &[spot.id(), dw.id()],
//!     CompileOptions::default(),
//! )
//! .unwrap();
//!
//! let spots = vec![100.0; 8];
//! let dws = vec![0.1; 8];
//! let out = kernel.invoke(&[&spots, &dws]).unwrap();
//! assert_eq!(out.len(), 2);
//! ```

pub mod autograd;
pub mod compiler;
pub mod graph;
pub mod kernel;

pub use autograd::differentiate;
pub use compiler::{compile, CompileError, CompileOptions};
pub use graph::{Graph, GraphScope, NodeId, Op, Scalar};
pub use kernel::{ExecutionError, Kernel};

/// Prelude module with commonly used types and functions.
pub mod prelude {
    pub use crate::autograd::differentiate;
    pub use crate::compiler::{compile, CompileError, CompileOptions};
    pub use crate::graph::{Graph, GraphScope, NodeId, Op, Scalar};
    pub use crate::kernel::{ExecutionError, Kernel};
}
