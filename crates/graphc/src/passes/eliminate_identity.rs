use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;
use crate::ops::Identity;

/// Forwards users of `identity(x)` to `x` and drops the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct EliminateIdentity;

impl Pass for EliminateIdentity {
    fn name(&self) -> &'static str {
        "eliminate_identity"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let mut erased = 0usize;
        for ins in module.instructions() {
            let inst = &module[ins];
            if !inst.op().is::<Identity>() || inst.outputs().is_empty() {
                continue;
            }
            let [input] = inst.inputs() else { continue };
            let input = *input;
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
