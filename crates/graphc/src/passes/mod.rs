//! Module passes and the step pipeline that sequences them.
//!
//! Passes operate on one [`Module`] at a time. A pipeline is a list of [`Step`]s;
//! `FixedPoint` steps repeat their body until nothing changes or the iteration
//! bound is hit. Modules are re-validated after each pass when requested, and a
//! violation aborts the pipeline with a structural error.

mod dce;
mod eliminate_contiguous;
mod eliminate_identity;
mod normalize_ops;
mod propagate_constant;
mod simplify_algebra;
mod simplify_reshapes;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ir::Module;

pub use dce::DeadCodeElimination;
pub use eliminate_contiguous::EliminateContiguous;
pub use eliminate_identity::EliminateIdentity;
pub use normalize_ops::NormalizeOps;
pub use propagate_constant::PropagateConstant;
pub use simplify_algebra::SimplifyAlgebra;
pub use simplify_reshapes::SimplifyReshapes;

/// Statistics returned by a [`Pass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the module.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied.
    pub rewrites_applied: usize,
    /// Instructions removed by the pass.
    pub erased_insts: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_insts: self.erased_insts + other.erased_insts,
        }
    }

    pub(crate) fn rewrites(count: usize) -> PassResult {
        PassResult {
            changed: count > 0,
            iterations: 1,
            rewrites_applied: count,
            erased_insts: 0,
        }
    }
}

pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, module: &mut Module) -> Result<PassResult>;
}

pub enum Step {
    Pass(Arc<dyn Pass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.steps.push(Step::Pass(Arc::new(pass)));
        self
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F) -> &mut Self
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
        self
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

/// Fails with a structural error naming the first offending instruction.
pub fn check_module(module: &Module, after: &str) -> Result<()> {
    let (ins, problem) = match (module.validate(), module.find_dangling_reference()) {
        (Some(ins), _) => (ins, "invalid"),
        (None, Some(ins)) => (ins, "dangling reference"),
        (None, None) => return Ok(()),
    };
    Err(Error::structural(
        module.name(),
        module.position(ins).unwrap_or_default(),
        format!("{problem} after `{after}`: {}", module.print_instruction(ins)),
    ))
}

/// Runs `steps` over `module`, validating after every pass.
pub fn run_passes(module: &mut Module, steps: &[Step]) -> Result<PassResult> {
    let mut totals = PassResult::default();
    run_steps(steps, module, true, &mut totals)?;
    Ok(totals)
}

pub(crate) fn run_steps(
    steps: &[Step],
    module: &mut Module,
    validate: bool,
    totals: &mut PassResult,
) -> Result<bool> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(module)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                tracing::debug!(
                    pass = pass.name(),
                    module = module.name(),
                    changed = stats.changed,
                    rewrites = stats.rewrites_applied,
                    erased = stats.erased_insts,
                    "pass finished"
                );
                if crate::env::trace_compile() {
                    tracing::debug!("after `{}`:\n{}", pass.name(), module);
                }
                if validate {
                    check_module(module, pass.name())?;
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, module, validate, &mut local)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}
