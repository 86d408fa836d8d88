use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;

/// Replaces operators by their canonical form and marks every instruction normalized.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizeOps;

impl Pass for NormalizeOps {
    fn name(&self) -> &'static str {
        "normalize_ops"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let mut rewrites = 0usize;
        let mut changed = false;
        for ins in module.instructions() {
            let inst = &module[ins];
            if inst.normalized() {
                continue;
            }
            changed = true;
            if inst.module_inputs().is_empty() {
                let shapes = inst
                    .inputs()
                    .iter()
                    .map(|&input| module[input].shape().clone())
                    .collect::<Vec<_>>();
                if let Some(op) = inst.op().normalize(&shapes)? {
                    tracing::trace!(from = %inst.op(), to = %op, "normalized operator");
                    module.replace_operator(ins, op)?;
                    rewrites += 1;
                }
            }
            module.set_normalized(ins, true)?;
        }
        Ok(PassResult {
            changed,
            iterations: 1,
            rewrites_applied: rewrites,
            erased_insts: 0,
        })
    }
}
