use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::{InstRef, Module};
use crate::matcher::{find_matches, pred, DynMatcher, MatchResult, Rule};
use crate::ops::{Contiguous, Operation};
use crate::shape_transform::ShapeTransformDescriptor;

const MAX_SWEEPS: usize = 64;

fn is_layout(module: &Module, ins: InstRef) -> bool {
    let op = module[ins].op();
    op.is_movement() || op.is::<Contiguous>()
}

/// Chain of layout operators ending at `end`, and a shorter replacement for it.
struct Plan {
    producer: InstRef,
    ops: Vec<Operation>,
}

fn plan(module: &Module, end: InstRef) -> Option<Plan> {
    let inst = &module[end];
    if !inst.op().is_movement() || inst.outputs().is_empty() {
        return None;
    }
    if inst.outputs().iter().all(|&user| is_layout(module, user)) {
        return None;
    }
    let mut chain = vec![inst.op().clone()];
    let mut current = *inst.inputs().first()?;
    while is_layout(module, current) {
        let [input] = module[current].inputs() else { break };
        chain.push(module[current].op().clone());
        current = *input;
    }
    if chain.len() < 2 {
        return None;
    }
    chain.reverse();
    let lens = module[current].shape().lens().ok()?;
    let mut descriptor = ShapeTransformDescriptor::create(lens, &chain)?;
    if inst.shape().lens().ok()? != descriptor.lens() {
        return None;
    }
    descriptor.simplify();
    let ops = descriptor.generate();
    (ops.len() < chain.len()).then_some(Plan {
        producer: current,
        ops,
    })
}

/// Collapses a chain of reshape/transpose/broadcast operators into the minimal
/// sequence with the same result.
struct CollapseLayoutChain;

impl Rule for CollapseLayoutChain {
    fn name(&self) -> &str {
        "collapse_layout_chain"
    }

    fn matcher(&self) -> DynMatcher {
        pred(|module, ins| plan(module, ins).is_some())
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        let end = result.result;
        let Some(plan) = plan(module, end) else {
            return Ok(());
        };
        let mut value = plan.producer;
        for op in plan.ops {
            value = module.insert_instruction(end, op, &[value])?;
        }
        module.replace_uses(end, value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimplifyReshapes;

impl Pass for SimplifyReshapes {
    fn name(&self) -> &'static str {
        "simplify_reshapes"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let rules: [&dyn Rule; 1] = [&CollapseLayoutChain];
        let mut totals = PassResult::default();
        for _ in 0..MAX_SWEEPS {
            let applied = find_matches(module, &rules)?;
            totals = totals.merge(PassResult::rewrites(applied));
            if applied == 0 {
                break;
            }
        }
        Ok(totals)
    }
}
