//! The compiled artifact and its batched executor.
//!
//! A [`Kernel`] wraps an immutable plan plus its fixed input/output slot
//! bindings. Invocation evaluates the plan once per batch lane over parallel
//! input arrays; lanes are independent, so the batch is parallelized with
//! rayon when vectorization is enabled and the same kernel may be invoked
//! concurrently from many threads.

use std::sync::Arc;

use log::debug;
use rayon::prelude::*;
use thiserror::Error;

use crate::compiler::{Plan, PlanStep, Src};

/// Errors detected at the invocation boundary, before any computation runs.
///
/// Numeric domain issues (division by zero, log of a negative value) are not
/// errors; they propagate through the batch as IEEE special values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The kernel was never produced by a successful compilation.
    #[error("kernel is not compiled")]
    NotCompiled,
    /// No input arrays were supplied.
    #[error("no input arrays were supplied")]
    NoInputs,
    /// The number of supplied arrays does not match the compiled input arity.
    #[error("kernel expects {expected} input arrays, got {got}")]
    InputArityMismatch { expected: usize, got: usize },
    /// The supplied arrays disagree on the batch length.
    #[error("input batch sizes differ: expected {expected}, got {got}")]
    BatchSizeMismatch { expected: usize, got: usize },
}

/// An immutable, concurrency-safe executable produced by
/// [`compile`](crate::compiler::compile).
///
/// The default-constructed kernel is the not-compiled state; invoking it
/// reports [`ExecutionError::NotCompiled`].
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    plan: Option<Arc<Plan>>,
}

impl Kernel {
    pub(crate) fn from_plan(plan: Arc<Plan>) -> Self {
        Self { plan: Some(plan) }
    }

    /// Whether this kernel holds a compiled plan.
    pub fn is_compiled(&self) -> bool {
        self.plan.is_some()
    }

    /// The number of input arrays an invocation must supply.
    pub fn num_inputs(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.num_inputs)
    }

    /// The number of output arrays an invocation produces.
    pub fn num_outputs(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.outputs.len())
    }

    /// The number of instructions in the compiled plan.
    pub fn step_count(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.steps.len())
    }

    /// Executes the plan over a batch, one lane per element of the input
    /// arrays, and returns one output array per compiled output.
    ///
    /// All input arrays must have the same length B; every returned array
    /// has length B as well.
    pub fn invoke(&self, inputs: &[&[f64]]) -> Result<Vec<Vec<f64>>, ExecutionError> {
        let plan = self.plan.as_deref().ok_or(ExecutionError::NotCompiled)?;
        if inputs.is_empty() {
            return Err(ExecutionError::NoInputs);
        }
        if inputs.len() != plan.num_inputs {
            return Err(ExecutionError::InputArityMismatch {
                expected: plan.num_inputs,
                got: inputs.len(),
            });
        }
        let batch = inputs[0].len();
        for array in &inputs[1..] {
            if array.len() != batch {
                return Err(ExecutionError::BatchSizeMismatch {
                    expected: batch,
                    got: array.len(),
                });
            }
        }

        let num_outputs = plan.outputs.len();
        debug!(
            "invoking kernel: {} lanes x {} steps, {} outputs",
            batch,
            plan.steps.len(),
            num_outputs
        );

        // Lane-major staging buffer; each chunk of `num_outputs` values is
        // one lane, which gives rayon disjoint mutable slices to fill.
        let mut staged = vec![0.0_f64; batch * num_outputs];
        if plan.vectorize {
            staged
                .par_chunks_mut(num_outputs)
                .enumerate()
                .for_each_init(
                    || vec![0.0_f64; plan.num_regs],
                    |regs, (lane, out)| evaluate_lane(plan, inputs, lane, regs, out),
                );
        } else {
            let mut regs = vec![0.0_f64; plan.num_regs];
            for (lane, out) in staged.chunks_mut(num_outputs).enumerate() {
                evaluate_lane(plan, inputs, lane, &mut regs, out);
            }
        }

        let mut results: Vec<Vec<f64>> = Vec::with_capacity(num_outputs);
        for output in 0..num_outputs {
            let mut column = Vec::with_capacity(batch);
            for lane in 0..batch {
                column.push(staged[lane * num_outputs + output]);
            }
            results.push(column);
        }
        Ok(results)
    }
}

/// Evaluates every plan step for one batch lane, then copies the designated
/// output slots into `out`.
fn evaluate_lane(plan: &Plan, inputs: &[&[f64]], lane: usize, regs: &mut [f64], out: &mut [f64]) {
    fn fetch(src: Src, regs: &[f64], inputs: &[&[f64]], lane: usize) -> f64 {
        match src {
            Src::Reg(r) => regs[r],
            Src::Input(i) => inputs[i][lane],
            Src::Const(v) => v,
        }
    }

    for step in &plan.steps {
        match *step {
            PlanStep::Unary { op, x, dst } => {
                regs[dst] = op.eval(fetch(x, regs, inputs, lane));
            }
            PlanStep::Binary { op, lhs, rhs, dst } => {
                let a = fetch(lhs, regs, inputs, lane);
                let b = fetch(rhs, regs, inputs, lane);
                regs[dst] = if plan.fast_math {
                    op.eval_fast(a, b)
                } else {
                    op.eval(a, b)
                };
            }
        }
    }
    for (slot, &src) in plan.outputs.iter().enumerate() {
        out[slot] = fetch(src, regs, inputs, lane);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::graph::Graph;

    #[test]
    fn default_kernel_is_not_compiled() {
        let kernel = Kernel::default();
        assert!(!kernel.is_compiled());
        let values = [1.0, 2.0];
        let err = kernel.invoke(&[&values]).unwrap_err();
        assert_eq!(err, ExecutionError::NotCompiled);
    }

    #[test]
    fn batch_size_mismatch_names_lengths() {
        let graph = Graph::new();
        let x = graph.input(None);
        let y = graph.input(None);
        let f = x + y;
        let kernel = compile(
            &graph,
            &[f.id()],
            &[x.id(), y.id()],
            CompileOptions::default(),
        )
        .unwrap();

        let long = vec![0.0; 100];
        let short = vec![0.0; 99];
        let err = kernel.invoke(&[&long, &short]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::BatchSizeMismatch {
                expected: 100,
                got: 99
            }
        );

        let other = vec![1.0; 100];
        let out = kernel.invoke(&[&long, &other]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 100);
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let graph = Graph::new();
        let x = graph.input(None);
        let y = graph.input(None);
        let f = x * y;
        let kernel = compile(
            &graph,
            &[f.id()],
            &[x.id(), y.id()],
            CompileOptions::default(),
        )
        .unwrap();
        let values = [1.0, 2.0];
        let err = kernel.invoke(&[&values]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::InputArityMismatch {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn parallel_and_scalar_paths_agree() {
        let graph = Graph::new();
        let x = graph.input(None);
        let f = (x * x + 1.0).sqrt().ln();

        let make = |vectorize| {
            compile(
                &graph,
                &[f.id()],
                &[x.id()],
                CompileOptions {
                    enable_vectorization: vectorize,
                    ..CompileOptions::default()
                },
            )
            .unwrap()
        };

        let values: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01 - 5.0).collect();
        let parallel = make(true).invoke(&[&values]).unwrap();
        let scalar = make(false).invoke(&[&values]).unwrap();
        assert_eq!(parallel, scalar);
    }

    #[test]
    fn domain_issues_propagate_as_ieee_values() {
        let graph = Graph::new();
        let x = graph.input(None);
        let f = x.ln();
        let kernel = compile(&graph, &[f.id()], &[x.id()], CompileOptions::default()).unwrap();
        let values = [-1.0, 0.0, 1.0];
        let out = kernel.invoke(&[&values]).unwrap();
        assert!(out[0][0].is_nan());
        assert_eq!(out[0][1], f64::NEG_INFINITY);
        assert_eq!(out[0][2], 0.0);
    }
}
