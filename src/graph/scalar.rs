use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::graph::{Graph, NodeId, Op};

/// A lightweight, copyable handle to a node in a [`Graph`].
///
/// `Scalar` provides the fluent surface for building expressions with
/// ordinary arithmetic syntax. It holds a reference to the graph and the id
/// of the node it represents; every operation appends a new node and returns
/// a new handle.
///
/// # Examples
///
/// ```
/// use pathwise::graph::Graph;
///
/// let graph = Graph::new();
/// let x = graph.input(Some("x"));
/// let y = (x * x + 1.0).sqrt();
/// assert_eq!(graph.len(), 5); // x, x*x, 1.0, the sum, sqrt
/// let _ = y;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Scalar<'g> {
    pub(crate) id: NodeId,
    pub(crate) graph: &'g Graph,
}

/// Conversion into a [`Scalar`] on a given graph.
///
/// Implemented for `Scalar` itself and for `f64`, which becomes a fresh
/// constant node. This is what lets `x.max(0.0)` and `x + 1.0` read
/// naturally.
pub trait IntoScalar<'g> {
    fn into_scalar(self, graph: &'g Graph) -> Scalar<'g>;
}

impl<'g> IntoScalar<'g> for Scalar<'g> {
    fn into_scalar(self, graph: &'g Graph) -> Scalar<'g> {
        debug_assert!(std::ptr::eq(self.graph, graph), "scalars from different graphs");
        self
    }
}

impl<'g> IntoScalar<'g> for f64 {
    fn into_scalar(self, graph: &'g Graph) -> Scalar<'g> {
        graph.constant(self)
    }
}

impl<'g> Scalar<'g> {
    /// The id of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The graph this scalar belongs to.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// The operation of the underlying node.
    pub fn op(&self) -> Op {
        self.graph.op(self.id)
    }

    /// The payload of a `Const` or `Param` node, `NaN` for anything whose
    /// value is only known at kernel execution time.
    pub fn value(&self) -> f64 {
        match self.op() {
            Op::Const(v) => v,
            Op::Param { value, .. } => value,
            _ => f64::NAN,
        }
    }

    /// Attaches a human-readable name to the node and returns the handle.
    pub fn with_name(self, name: &str) -> Self {
        self.graph.set_name(self.id, name);
        self
    }

    /// The explicit name of the node, if one was set.
    pub fn name(&self) -> Option<String> {
        self.graph.name(self.id)
    }

    fn unary(self, op: Op) -> Self {
        self.graph.scalar(self.graph.unary(op, self.id))
    }

    fn binary(self, op: Op, rhs: impl IntoScalar<'g>) -> Self {
        let rhs = rhs.into_scalar(self.graph);
        self.graph.scalar(self.graph.binary(op, self.id, rhs.id))
    }

    /// Square root.
    pub fn sqrt(self) -> Self {
        self.unary(Op::Sqrt)
    }

    /// Natural exponential.
    pub fn exp(self) -> Self {
        self.unary(Op::Exp)
    }

    /// Natural logarithm.
    pub fn ln(self) -> Self {
        self.unary(Op::Log)
    }

    /// Absolute value.
    pub fn abs(self) -> Self {
        self.unary(Op::Abs)
    }

    /// `self` raised to the power `exponent`.
    pub fn powf(self, exponent: impl IntoScalar<'g>) -> Self {
        self.binary(Op::Pow, exponent)
    }

    /// The larger of `self` and `rhs`.
    pub fn max(self, rhs: impl IntoScalar<'g>) -> Self {
        self.binary(Op::Max, rhs)
    }

    /// The smaller of `self` and `rhs`.
    pub fn min(self, rhs: impl IntoScalar<'g>) -> Self {
        self.binary(Op::Min, rhs)
    }

    /// The derivative of `self` with respect to `wrt`, as a symbolic `Grad`
    /// node resolved at compile time.
    pub fn grad(self, wrt: Scalar<'g>) -> Self {
        self.graph.scalar(self.graph.grad(self.id, wrt.id))
    }
}

// --- Operator overloads ---

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<'g> $trait for Scalar<'g> {
            type Output = Scalar<'g>;
            fn $method(self, rhs: Self) -> Self::Output {
                self.binary($op, rhs)
            }
        }

        impl<'g> $trait<f64> for Scalar<'g> {
            type Output = Scalar<'g>;
            fn $method(self, rhs: f64) -> Self::Output {
                self.binary($op, rhs)
            }
        }

        impl<'g> $trait<Scalar<'g>> for f64 {
            type Output = Scalar<'g>;
            fn $method(self, rhs: Scalar<'g>) -> Self::Output {
                let lhs = rhs.graph.constant(self);
                lhs.binary($op, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, Op::Add);
impl_binary_operator!(Sub, sub, Op::Sub);
impl_binary_operator!(Mul, mul, Op::Mul);
impl_binary_operator!(Div, div, Op::Div);

impl<'g> Neg for Scalar<'g> {
    type Output = Scalar<'g>;
    fn neg(self) -> Self::Output {
        self.unary(Op::Neg)
    }
}

macro_rules! impl_assign_operator {
    ($trait:ident, $method:ident, $op:tt) => {
        impl<'g> $trait for Scalar<'g> {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        }

        impl<'g> $trait<f64> for Scalar<'g> {
            fn $method(&mut self, rhs: f64) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_assign_operator!(AddAssign, add_assign, +);
impl_assign_operator!(SubAssign, sub_assign, -);
impl_assign_operator!(MulAssign, mul_assign, *);
impl_assign_operator!(DivAssign, div_assign, /);
