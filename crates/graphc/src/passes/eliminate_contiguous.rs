use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;
use crate::ops::Contiguous;

/// Removes `contiguous` copies of values that already have a standard layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct EliminateContiguous;

impl Pass for EliminateContiguous {
    fn name(&self) -> &'static str {
        "eliminate_contiguous"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let mut erased = 0usize;
        for ins in module.instructions() {
            let inst = &module[ins];
            if !inst.op().is::<Contiguous>() || inst.outputs().is_empty() {
                continue;
            }
            let [input] = inst.inputs() else { continue };
            let input = *input;
            let source = module[input].shape();
            if source.is_dynamic() || !source.standard() {
                continue;
            }
            module.replace_uses(ins, input)?;
            module.erase(ins)?;
            erased += 1;
        }
        Ok(PassResult {
            changed: erased > 0,
            iterations: 1,
            rewrites_applied: erased,
            erased_insts: erased,
        })
    }
}
