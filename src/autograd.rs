//! Reverse-mode differentiation over graph nodes.
//!
//! Derivatives are ordinary graph nodes: [`differentiate`] walks the
//! ancestors of an output in reverse creation order, accumulating adjoint
//! expressions per node, and returns the node holding the adjoint of the
//! `wrt` leaf. Symbolic `Grad` nodes are resolved through the same machinery
//! before compilation, so gradients of gradients work unchanged.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::graph::{Graph, NodeId, Op};

/// Builds a node computing d`output` / d`wrt` and returns its id.
///
/// If `wrt` is not an ancestor of `output`, the result is the constant `0.0`;
/// the derivative of an independent quantity is zero, not an error.
///
/// Contributions to operands that are shared between several consumers are
/// summed, so the work and the size of the emitted expression stay linear in
/// the number of ancestor nodes.
pub fn differentiate(graph: &Graph, output: NodeId, wrt: NodeId) -> NodeId {
    let mut memo = FxHashMap::default();
    let output = resolve(graph, output, &mut memo);
    let wrt = resolve(graph, wrt, &mut memo);
    backward(graph, output, wrt)
}

/// Rewrites `node` into an equivalent `Grad`-free node, memoized in `memo`.
///
/// A `Grad(output, wrt)` node becomes the differentiated expression of its
/// resolved operands; any node whose operands were rewritten is rebuilt with
/// the new operands. Nodes untouched by the rewrite keep their identity.
pub(crate) fn resolve(
    graph: &Graph,
    node: NodeId,
    memo: &mut FxHashMap<NodeId, NodeId>,
) -> NodeId {
    if let Some(&resolved) = memo.get(&node) {
        return resolved;
    }
    let data = graph.node(node);
    let resolved = match data.op {
        Op::Grad => {
            let output = resolve(graph, data.src[0], memo);
            let wrt = resolve(graph, data.src[1], memo);
            trace!("resolving grad node {:?} -> d{:?}/d{:?}", node, output, wrt);
            backward(graph, output, wrt)
        }
        _ => {
            let src: Vec<NodeId> = data
                .src
                .iter()
                .map(|&operand| resolve(graph, operand, memo))
                .collect();
            if src == data.src {
                node
            } else {
                graph.add_node(data.op, src)
            }
        }
    };
    memo.insert(node, resolved);
    resolved
}

/// The reverse sweep proper. `output` must be free of `Grad` nodes.
fn backward(graph: &Graph, output: NodeId, wrt: NodeId) -> NodeId {
    let before = graph.len();
    let mut adjoints: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    adjoints.insert(output, graph.add_node(Op::Const(1.0), vec![]));

    // Creation order is topological order, so a reverse id scan visits every
    // node after all of its consumers.
    for raw_id in (0..=output.0).rev() {
        let id = NodeId(raw_id);
        let Some(&adj) = adjoints.get(&id) else {
            continue;
        };
        let data = graph.node(id);
        let a = data.src.first().copied();
        let b = data.src.get(1).copied();
        match data.op {
            Op::Const(_) | Op::Input { .. } | Op::Param { .. } => {}
            // Piecewise constant; derivative defined as zero everywhere.
            Op::Step => {}
            Op::Neg => {
                let x = a.expect("unary operand");
                accumulate(graph, &mut adjoints, x, neg(graph, adj));
            }
            Op::Sqrt => {
                // d sqrt(x) = 0.5 / sqrt(x); reuse this node for sqrt(x).
                let x = a.expect("unary operand");
                let half = graph.add_node(Op::Const(0.5), vec![]);
                let scaled = mul(graph, adj, half);
                accumulate(graph, &mut adjoints, x, div(graph, scaled, id));
            }
            Op::Exp => {
                // d exp(x) = exp(x); reuse this node.
                let x = a.expect("unary operand");
                accumulate(graph, &mut adjoints, x, mul(graph, adj, id));
            }
            Op::Log => {
                let x = a.expect("unary operand");
                accumulate(graph, &mut adjoints, x, div(graph, adj, x));
            }
            Op::Abs => {
                // sign(x) = step(x) - step(-x), which is 0 at x == 0.
                let x = a.expect("unary operand");
                let pos = graph.unary(Op::Step, x);
                let neg_x = graph.unary(Op::Neg, x);
                let non_neg = graph.unary(Op::Step, neg_x);
                let sign = graph.binary(Op::Sub, pos, non_neg);
                accumulate(graph, &mut adjoints, x, mul(graph, adj, sign));
            }
            Op::Add => {
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                accumulate(graph, &mut adjoints, a, adj);
                accumulate(graph, &mut adjoints, b, adj);
            }
            Op::Sub => {
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                accumulate(graph, &mut adjoints, a, adj);
                accumulate(graph, &mut adjoints, b, neg(graph, adj));
            }
            Op::Mul => {
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                accumulate(graph, &mut adjoints, a, mul(graph, adj, b));
                accumulate(graph, &mut adjoints, b, mul(graph, adj, a));
            }
            Op::Div => {
                // d(a/b)/da = 1/b, d(a/b)/db = -a/b^2
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                accumulate(graph, &mut adjoints, a, div(graph, adj, b));
                let numer = mul(graph, adj, a);
                let denom = mul(graph, b, b);
                let contrib = neg(graph, div(graph, numer, denom));
                accumulate(graph, &mut adjoints, b, contrib);
            }
            Op::Pow => {
                // d(a^e)/da = e * a^(e-1); d(a^e)/de = a^e * ln(a).
                let (base, exp) = (a.expect("base"), b.expect("exponent"));
                let one = graph.add_node(Op::Const(1.0), vec![]);
                let exp_m1 = graph.binary(Op::Sub, exp, one);
                let pow_m1 = graph.binary(Op::Pow, base, exp_m1);
                let dbase = mul(graph, mul(graph, adj, exp), pow_m1);
                accumulate(graph, &mut adjoints, base, dbase);
                let log_base = graph.unary(Op::Log, base);
                // Reuse this node for a^e.
                let dexp = mul(graph, mul(graph, adj, id), log_base);
                accumulate(graph, &mut adjoints, exp, dexp);
            }
            Op::Max => {
                // Ties attribute the adjoint to the left operand.
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                let diff = graph.binary(Op::Sub, a, b);
                let mask = graph.unary(Op::Step, diff);
                propagate_masked(graph, &mut adjoints, adj, mask, a, b);
            }
            Op::Min => {
                let (a, b) = (a.expect("lhs"), b.expect("rhs"));
                let diff = graph.binary(Op::Sub, b, a);
                let mask = graph.unary(Op::Step, diff);
                propagate_masked(graph, &mut adjoints, adj, mask, a, b);
            }
            Op::Grad => {
                debug_assert!(false, "grad nodes are resolved before the sweep");
            }
        }
    }

    let result = adjoints
        .remove(&wrt)
        .unwrap_or_else(|| graph.add_node(Op::Const(0.0), vec![]));
    debug!(
        "differentiated {:?} wrt {:?}: {} adjoint nodes added",
        output,
        wrt,
        graph.len() - before
    );
    result
}

/// Sends `adj * mask` to `winner` and `adj * (1 - mask)` to `loser`.
fn propagate_masked(
    graph: &Graph,
    adjoints: &mut FxHashMap<NodeId, NodeId>,
    adj: NodeId,
    mask: NodeId,
    winner: NodeId,
    loser: NodeId,
) {
    accumulate(graph, adjoints, winner, mul(graph, adj, mask));
    let one = graph.add_node(Op::Const(1.0), vec![]);
    let inv_mask = graph.binary(Op::Sub, one, mask);
    accumulate(graph, adjoints, loser, mul(graph, adj, inv_mask));
}

/// Adds `contrib` into the accumulated adjoint of `node`.
fn accumulate(
    graph: &Graph,
    adjoints: &mut FxHashMap<NodeId, NodeId>,
    node: NodeId,
    contrib: NodeId,
) {
    match adjoints.get(&node) {
        Some(&existing) => {
            let summed = graph.binary(Op::Add, existing, contrib);
            adjoints.insert(node, summed);
        }
        None => {
            adjoints.insert(node, contrib);
        }
    }
}

// Small smart constructors: the seed adjoint is the constant one, and
// eliding it here keeps derivative expressions from drowning in `1 * x`
// noise before the compiler's folding pass even runs.

fn is_const(graph: &Graph, id: NodeId, value: f64) -> bool {
    matches!(graph.op(id), Op::Const(v) if v == value)
}

fn mul(graph: &Graph, a: NodeId, b: NodeId) -> NodeId {
    if is_const(graph, a, 1.0) {
        return b;
    }
    if is_const(graph, b, 1.0) {
        return a;
    }
    graph.binary(Op::Mul, a, b)
}

fn div(graph: &Graph, a: NodeId, b: NodeId) -> NodeId {
    if is_const(graph, b, 1.0) {
        return a;
    }
    graph.binary(Op::Div, a, b)
}

fn neg(graph: &Graph, x: NodeId) -> NodeId {
    graph.unary(Op::Neg, x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_slope() {
        let graph = Graph::new();
        let x = graph.input(Some("x"));
        let y = x * 3.0 + 1.0;
        let dy = differentiate(&graph, y.id(), x.id());
        // d(3x + 1)/dx accumulates to the constant factor.
        assert!(graph.contains(dy));
        assert_eq!(graph.op(dy), Op::Const(3.0));
    }

    #[test]
    fn unreachable_wrt_is_zero() {
        let graph = Graph::new();
        let x = graph.input(Some("x"));
        let y = graph.input(Some("y"));
        let f = x * x;
        let df = differentiate(&graph, f.id(), y.id());
        assert_eq!(graph.op(df), Op::Const(0.0));
    }

    #[test]
    fn self_derivative_is_one() {
        let graph = Graph::new();
        let x = graph.input(None);
        let dx = differentiate(&graph, x.id(), x.id());
        assert_eq!(graph.op(dx), Op::Const(1.0));
    }

    #[test]
    fn shared_subexpression_sums_contributions() {
        let graph = Graph::new();
        let x = graph.input(None);
        let g = x.exp();
        let f = g + g;
        let before = graph.len();
        let df = differentiate(&graph, f.id(), x.id());
        // The two unit contributions through the shared node sum into one
        // adjoint, which then scales exp(x) once; linear growth.
        assert!(graph.len() - before <= 3);
        assert_eq!(graph.op(df), Op::Mul);
    }
}
