use std::sync::Arc;

use super::Program;
use crate::error::{Error, Result};
use crate::ir::ModuleId;
use crate::ops::RunOnTarget;
use crate::passes::{check_module, run_steps, PassResult};
use crate::target::Target;

/// Knobs for [`Program::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Bound for fixed-point steps in target pipelines.
    pub fixed_point_iters: usize,
    /// Check module invariants after every pass, not only after each pipeline.
    pub validate_each_pass: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            fixed_point_iters: crate::env::fixed_point_iters(),
            validate_each_pass: true,
        }
    }
}

impl Program {
    /// Assigns modules to targets, runs each target's pipeline over its modules and
    /// finalizes every instruction against its target's context.
    ///
    /// Target 0 owns `main` and everything not claimed by a `run_on_target`
    /// instruction; modules invoked through `run_on_target{t}` (and their own
    /// sub-modules) belong to target `t`.
    pub fn compile(&mut self, targets: Vec<Arc<dyn Target>>, options: &CompileOptions) -> Result<()> {
        if targets.is_empty() {
            return Err(Error::invalid_state("compile requires at least one target"));
        }
        if self.is_compiled() {
            return Err(Error::invalid_state("program is already compiled"));
        }
        let assignment = self.assign_targets(targets.len())?;
        let mut contexts: Vec<_> = targets.iter().map(|target| target.get_context()).collect();
        let mut totals = PassResult::default();

        for (target_id, target) in targets.iter().enumerate() {
            let steps = target.get_passes(contexts[target_id].as_mut(), options);
            for (index, module) in self.modules.iter_mut().enumerate() {
                if assignment[index] != target_id {
                    continue;
                }
                tracing::debug!(target = target.name(), module = module.name(), "compiling module");
                run_steps(&steps, module, options.validate_each_pass, &mut totals)?;
                check_module(module, target.name())?;
                for ins in module.instructions() {
                    module.set_target(ins, target_id)?;
                }
            }
        }
        tracing::debug!(
            rewrites = totals.rewrites_applied,
            erased = totals.erased_insts,
            "compilation finished"
        );

        self.targets = targets;
        self.contexts = contexts;
        self.finalize()
    }

    /// Target of every module, indexed like the module arena.
    fn assign_targets(&self, target_count: usize) -> Result<Vec<usize>> {
        let mut assignment: Vec<Option<usize>> = vec![None; self.modules.len()];
        let mut stack: Vec<(ModuleId, usize)> = vec![(self.main_id(), 0)];
        while let Some((id, target)) = stack.pop() {
            match assignment[id.index()] {
                Some(existing) if existing == target => continue,
                Some(existing) => {
                    return Err(Error::invalid_state(format!(
                        "module `{}` is used by targets {existing} and {target}",
                        self.module(id)?.name()
                    )))
                }
                None => assignment[id.index()] = Some(target),
            }
            let module = self.module(id)?;
            for ins in module.iter() {
                let inst = &module[ins];
                let sub_target = match inst.op().get::<RunOnTarget>() {
                    Some(run) if run.target_id >= target_count => {
                        return Err(Error::lookup(format!(
                            "run_on_target refers to target {} but only {target_count} given",
                            run.target_id
                        )))
                    }
                    Some(run) => run.target_id,
                    None => target,
                };
                for &sub in inst.module_inputs() {
                    self.module(sub)?;
                    stack.push((sub, sub_target));
                }
            }
        }
        Ok(assignment.into_iter().map(|t| t.unwrap_or(0)).collect())
    }

    /// Gives every operator a chance to prepare against its target context.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        for module in &self.modules {
            for ins in module.iter() {
                let inst = &module[ins];
                let ctx = self.contexts.get_mut(inst.target()).ok_or_else(|| {
                    Error::invalid_state(format!("no context for target {}", inst.target()))
                })?;
                let inputs = inst
                    .inputs()
                    .iter()
                    .map(|&input| module[input].shape().clone())
                    .collect::<Vec<_>>();
                inst.op().finalize(ctx.as_mut(), inst.shape(), &inputs)?;
            }
        }
        Ok(())
    }
}
