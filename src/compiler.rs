//! Compilation of graph outputs into flat evaluation plans.
//!
//! Compilation validates the requested outputs and declared inputs, resolves
//! symbolic `Grad` nodes into ordinary expressions, collects the transitive
//! operand closure of the outputs and emits it as a linear instruction list.
//! Creation order is already a topological order, so scheduling is a sort by
//! ascending node id. Optimization levels fold constants and deduplicate
//! common subexpressions; under default (non-fast-math) settings they never
//! change the mathematical result.

use std::sync::Arc;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::autograd;
use crate::graph::{Graph, NodeId, Op};
use crate::kernel::Kernel;

/// Errors detected during the validation/scheduling pass.
///
/// Compilation fails atomically on the first error encountered; no partial
/// kernel is ever returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// No output nodes were requested.
    #[error("no outputs were requested")]
    EmptyOutputs,
    /// No input nodes were declared.
    #[error("no inputs were declared")]
    EmptyInputs,
    /// A requested output does not name a node reachable in the graph.
    #[error("output {0:?} does not name a node in the graph")]
    UnreachableOutput(NodeId),
    /// An input leaf is used by an output but missing from the declared
    /// input set, so there would be no way to feed it a value.
    #[error("input '{name}' is used by an output but missing from the declared inputs")]
    UnboundInput { node: NodeId, name: String },
}

/// Non-semantic knobs for plan construction and execution strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Evaluate batch lanes in parallel. On by default.
    pub enable_vectorization: bool,
    /// Relax IEEE edge-case exactness of transcendental ops for speed.
    /// Off by default.
    pub enable_fast_math: bool,
    /// Effort spent compacting the plan: 0 = none, 1 = constant folding,
    /// 2 and above also eliminate common subexpressions.
    pub optimization_level: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            enable_vectorization: true,
            enable_fast_math: false,
            optimization_level: 2,
        }
    }
}

/// A unary operation as it appears in a plan. Leaf and `Grad` kinds never
/// survive to this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Log,
    Abs,
    Step,
}

impl UnaryOp {
    pub(crate) fn eval(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Step => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// A binary operation as it appears in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
}

impl BinaryOp {
    pub(crate) fn eval(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => lhs.powf(rhs),
            // Explicit comparisons keep the tie and NaN behavior in one
            // place instead of inheriting `f64::max`'s NaN filtering.
            BinaryOp::Max => {
                if lhs >= rhs {
                    lhs
                } else {
                    rhs
                }
            }
            BinaryOp::Min => {
                if lhs <= rhs {
                    lhs
                } else {
                    rhs
                }
            }
        }
    }

    /// The relaxed variant used when fast math is enabled: integral powers
    /// go through `powi`. Everything else matches [`BinaryOp::eval`].
    pub(crate) fn eval_fast(self, lhs: f64, rhs: f64) -> f64 {
        if self == BinaryOp::Pow && rhs.fract() == 0.0 && rhs.abs() <= i32::MAX as f64 {
            return lhs.powi(rhs as i32);
        }
        self.eval(lhs, rhs)
    }
}

/// Where an operand value comes from at execution time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Src {
    /// A previously computed intermediate register.
    Reg(usize),
    /// The current lane of the n-th declared input array.
    Input(usize),
    /// A value baked into the plan (constants and folded params).
    Const(f64),
}

/// One instruction of a compiled plan, writing into register `dst`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PlanStep {
    Unary { op: UnaryOp, x: Src, dst: usize },
    Binary { op: BinaryOp, lhs: Src, rhs: Src, dst: usize },
}

/// The ordered, validated program produced by compilation. Immutable and
/// free of shared mutable state, so kernels holding it can run concurrently.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub steps: Vec<PlanStep>,
    pub outputs: Vec<Src>,
    pub num_regs: usize,
    pub num_inputs: usize,
    pub vectorize: bool,
    pub fast_math: bool,
}

/// A hashable stand-in for [`Src`] used as a value-numbering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SrcKey {
    Reg(usize),
    Input(usize),
    Const(u64),
}

impl From<Src> for SrcKey {
    fn from(src: Src) -> Self {
        match src {
            Src::Reg(r) => SrcKey::Reg(r),
            Src::Input(i) => SrcKey::Input(i),
            Src::Const(v) => SrcKey::Const(v.to_bits()),
        }
    }
}

/// Compiles the given graph outputs, against the declared inputs, into an
/// executable [`Kernel`].
///
/// `outputs` and `inputs` are ordered: the n-th requested output lands in
/// the n-th result array, and the n-th declared input is fed by the n-th
/// array passed to [`Kernel::invoke`]. Resolving `Grad` nodes materializes
/// their derivative expressions in `graph`; the emitted plan itself holds no
/// references into the graph.
pub fn compile(
    graph: &Graph,
    outputs: &[NodeId],
    inputs: &[NodeId],
    options: CompileOptions,
) -> Result<Kernel, CompileError> {
    if outputs.is_empty() {
        return Err(CompileError::EmptyOutputs);
    }
    if inputs.is_empty() {
        return Err(CompileError::EmptyInputs);
    }
    for &output in outputs {
        if !graph.contains(output) {
            return Err(CompileError::UnreachableOutput(output));
        }
    }

    // Positions of the declared inputs; the first declaration of a node wins.
    let mut input_positions: FxHashMap<NodeId, usize> = FxHashMap::default();
    for (pos, &input) in inputs.iter().enumerate() {
        input_positions.entry(input).or_insert(pos);
    }

    // Expand Grad nodes into ordinary derivative expressions.
    let mut memo = FxHashMap::default();
    let resolved: Vec<NodeId> = outputs
        .iter()
        .map(|&output| autograd::resolve(graph, output, &mut memo))
        .collect();

    // Transitive operand closure of the resolved outputs.
    let mut reachable: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack: Vec<NodeId> = resolved.clone();
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        let data = graph.node(id);
        if let Op::Input { .. } = data.op {
            if !input_positions.contains_key(&id) {
                return Err(CompileError::UnboundInput {
                    node: id,
                    name: graph.display_name(id),
                });
            }
        }
        stack.extend(data.src.iter().copied());
    }

    // An operand always has a smaller id than its consumer, so ascending id
    // order is a valid evaluation order.
    let mut schedule: Vec<NodeId> = reachable.into_iter().collect();
    schedule.sort_unstable();

    let fold_constants = options.optimization_level >= 1;
    let dedup = options.optimization_level >= 2;

    let mut slots: FxHashMap<NodeId, Src> = FxHashMap::default();
    let mut seen: FxHashMap<(u8, SrcKey, SrcKey), Src> = FxHashMap::default();
    let mut steps: Vec<PlanStep> = Vec::new();

    for &id in &schedule {
        let data = graph.node(id);
        let src = match data.op {
            Op::Const(v) => Src::Const(v),
            Op::Param { value, .. } => Src::Const(value),
            Op::Input { .. } => Src::Input(input_positions[&id]),
            Op::Neg | Op::Sqrt | Op::Exp | Op::Log | Op::Abs | Op::Step => {
                let op = match data.op {
                    Op::Neg => UnaryOp::Neg,
                    Op::Sqrt => UnaryOp::Sqrt,
                    Op::Exp => UnaryOp::Exp,
                    Op::Log => UnaryOp::Log,
                    Op::Abs => UnaryOp::Abs,
                    _ => UnaryOp::Step,
                };
                let x = slots[&data.src[0]];
                emit_unary(op, x, fold_constants, dedup, &mut seen, &mut steps)
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::Max | Op::Min => {
                let op = match data.op {
                    Op::Add => BinaryOp::Add,
                    Op::Sub => BinaryOp::Sub,
                    Op::Mul => BinaryOp::Mul,
                    Op::Div => BinaryOp::Div,
                    Op::Pow => BinaryOp::Pow,
                    Op::Max => BinaryOp::Max,
                    _ => BinaryOp::Min,
                };
                let lhs = slots[&data.src[0]];
                let rhs = slots[&data.src[1]];
                emit_binary(op, lhs, rhs, fold_constants, dedup, &mut seen, &mut steps)
            }
            Op::Grad => {
                // Resolution replaced every Grad in the closure; a Grad node
                // can only be scheduled if requested directly, in which case
                // its resolved form is what the outputs map to.
                continue;
            }
        };
        trace!("node {:?} ({}) -> {:?}", id, data.op.name(), src);
        slots.insert(id, src);
    }

    let output_srcs: Vec<Src> = resolved.iter().map(|id| slots[id]).collect();
    let plan = Plan {
        num_regs: steps.len(),
        steps,
        outputs: output_srcs,
        num_inputs: inputs.len(),
        vectorize: options.enable_vectorization,
        fast_math: options.enable_fast_math,
    };
    debug!(
        "compiled {} outputs / {} inputs into {} steps ({} graph nodes scheduled)",
        outputs.len(),
        inputs.len(),
        plan.steps.len(),
        schedule.len()
    );
    Ok(Kernel::from_plan(Arc::new(plan)))
}

fn emit_unary(
    op: UnaryOp,
    x: Src,
    fold: bool,
    dedup: bool,
    seen: &mut FxHashMap<(u8, SrcKey, SrcKey), Src>,
    steps: &mut Vec<PlanStep>,
) -> Src {
    if fold {
        if let Src::Const(v) = x {
            return Src::Const(op.eval(v));
        }
    }
    let key = (unary_code(op), SrcKey::from(x), SrcKey::Reg(usize::MAX));
    if dedup {
        if let Some(&existing) = seen.get(&key) {
            return existing;
        }
    }
    let dst = steps.len();
    steps.push(PlanStep::Unary { op, x, dst });
    let src = Src::Reg(dst);
    if dedup {
        seen.insert(key, src);
    }
    src
}

fn emit_binary(
    op: BinaryOp,
    lhs: Src,
    rhs: Src,
    fold: bool,
    dedup: bool,
    seen: &mut FxHashMap<(u8, SrcKey, SrcKey), Src>,
    steps: &mut Vec<PlanStep>,
) -> Src {
    if fold {
        if let (Src::Const(a), Src::Const(b)) = (lhs, rhs) {
            return Src::Const(op.eval(a, b));
        }
    }
    let key = (binary_code(op), SrcKey::from(lhs), SrcKey::from(rhs));
    if dedup {
        if let Some(&existing) = seen.get(&key) {
            return existing;
        }
    }
    let dst = steps.len();
    steps.push(PlanStep::Binary { op, lhs, rhs, dst });
    let src = Src::Reg(dst);
    if dedup {
        seen.insert(key, src);
    }
    src
}

fn unary_code(op: UnaryOp) -> u8 {
    match op {
        UnaryOp::Neg => 0,
        UnaryOp::Sqrt => 1,
        UnaryOp::Exp => 2,
        UnaryOp::Log => 3,
        UnaryOp::Abs => 4,
        UnaryOp::Step => 5,
    }
}

fn binary_code(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 16,
        BinaryOp::Sub => 17,
        BinaryOp::Mul => 18,
        BinaryOp::Div => 19,
        BinaryOp::Pow => 20,
        BinaryOp::Max => 21,
        BinaryOp::Min => 22,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outputs_fail() {
        let graph = Graph::new();
        let x = graph.input(None);
        let err = compile(&graph, &[], &[x.id()], CompileOptions::default());
        assert_eq!(err.unwrap_err(), CompileError::EmptyOutputs);
    }

    #[test]
    fn empty_inputs_fail() {
        let graph = Graph::new();
        let x = graph.input(None);
        let err = compile(&graph, &[x.id()], &[], CompileOptions::default());
        assert_eq!(err.unwrap_err(), CompileError::EmptyInputs);
    }

    #[test]
    fn out_of_range_output_is_unreachable() {
        let graph = Graph::new();
        let x = graph.input(None);
        let bogus = NodeId(42);
        let err = compile(&graph, &[bogus], &[x.id()], CompileOptions::default());
        assert_eq!(err.unwrap_err(), CompileError::UnreachableOutput(bogus));
    }

    #[test]
    fn undeclared_input_is_unbound() {
        let graph = Graph::new();
        let x = graph.input(Some("x"));
        let y = graph.input(Some("y"));
        let f = x + y;
        let err = compile(&graph, &[f.id()], &[x.id()], CompileOptions::default());
        match err.unwrap_err() {
            CompileError::UnboundInput { node, name } => {
                assert_eq!(node, y.id());
                assert_eq!(name, "y");
            }
            other => panic!("expected UnboundInput, got {other:?}"),
        }
    }

    #[test]
    fn constant_folding_shrinks_plans() {
        let graph = Graph::new();
        let x = graph.input(None);
        // (2 * 3) + x: the constant product folds away at level >= 1.
        let c = graph.constant(2.0) * graph.constant(3.0);
        let f = c + x;

        let folded = compile(
            &graph,
            &[f.id()],
            &[x.id()],
            CompileOptions::default(),
        )
        .unwrap();
        let raw = compile(
            &graph,
            &[f.id()],
            &[x.id()],
            CompileOptions {
                optimization_level: 0,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(folded.step_count() < raw.step_count());
        assert_eq!(folded.step_count(), 1);
    }

    #[test]
    fn cse_deduplicates_identical_steps() {
        let graph = Graph::new();
        let x = graph.input(None);
        // x.exp() built twice produces two graph nodes but one plan step at
        // level >= 2.
        let f = x.exp() + x.exp();
        let kernel = compile(&graph, &[f.id()], &[x.id()], CompileOptions::default()).unwrap();
        assert_eq!(kernel.step_count(), 2); // one Exp, one Add
    }
}
