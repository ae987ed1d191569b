/// A unique identifier for a node within a [`Graph`](super::Graph).
///
/// Ids are dense and assigned in creation order, so the natural order of
/// `NodeId`s is also a topological order of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// An enumeration of all scalar operations a node can perform.
///
/// Leaves carry their payload directly: constants and params bake a value,
/// inputs and params additionally carry the dense per-kind slot an array is
/// bound to at kernel invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// A fixed scalar value.
    Const(f64),
    /// A batched input, fed one array per kernel invocation.
    Input { slot: usize },
    /// A calibrated parameter: a named value baked into compiled plans.
    Param { slot: usize, value: f64 },

    /// Negation.
    Neg,
    /// Square root.
    Sqrt,
    /// Natural exponential.
    Exp,
    /// Natural logarithm.
    Log,
    /// Absolute value.
    Abs,
    /// Heaviside step: `1.0` if the operand is `>= 0.0`, else `0.0`.
    ///
    /// Used by the differentiator to express the selection masks of
    /// `Max`/`Min`/`Abs` derivatives as ordinary expressions. Its own
    /// derivative is zero.
    Step,

    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// `lhs` raised to the power `rhs`.
    Pow,
    /// The larger of two operands.
    Max,
    /// The smaller of two operands.
    Min,

    /// The derivative of the first operand with respect to the second.
    ///
    /// Resolved into an ordinary expression by the differentiator before any
    /// plan is emitted; never evaluated as a primitive.
    Grad,
}

impl Op {
    /// Returns `true` for the leaf kinds (`Const`, `Input`, `Param`).
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Const(_) | Op::Input { .. } | Op::Param { .. })
    }

    /// The number of operands this operation takes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Const(_) | Op::Input { .. } | Op::Param { .. } => 0,
            Op::Neg | Op::Sqrt | Op::Exp | Op::Log | Op::Abs | Op::Step => 1,
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Pow
            | Op::Max
            | Op::Min
            | Op::Grad => 2,
        }
    }

    /// A static label for the operation kind.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Const(_) => "Const",
            Op::Input { .. } => "Input",
            Op::Param { .. } => "Param",
            Op::Neg => "Neg",
            Op::Sqrt => "Sqrt",
            Op::Exp => "Exp",
            Op::Log => "Log",
            Op::Abs => "Abs",
            Op::Step => "Step",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Pow => "Pow",
            Op::Max => "Max",
            Op::Min => "Min",
            Op::Grad => "Grad",
        }
    }
}

/// The data associated with a single node in the expression graph.
///
/// Nodes are immutable once created: the operand list is fixed at
/// construction and only ever references nodes with smaller ids, which makes
/// the graph acyclic by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    /// The operation performed by this node.
    pub op: Op,
    /// The `NodeId`s of the operands, in order.
    pub src: Vec<NodeId>,
    /// An optional human-readable name.
    pub name: Option<String>,
}
