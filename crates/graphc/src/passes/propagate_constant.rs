use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;

/// Folds constant subexpressions into literals.
///
/// Broadcast results are left alone so a small literal is not materialized at the
/// broadcast size. The folded originals are left for dead code elimination.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropagateConstant;

impl Pass for PropagateConstant {
    fn name(&self) -> &'static str {
        "propagate_constant"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let mut folded = 0usize;
        for ins in module.instructions() {
            let inst = &module[ins];
            if inst.op().is_builtin()
                || inst.outputs().is_empty()
                || inst.shape().is_dynamic()
                || inst.shape().is_tuple()
                || inst.shape().broadcasted()
                || !module.can_eval(ins)
            {
                continue;
            }
            let value = module.eval_constant(ins)?.contiguous()?;
            let literal = module.add_literal(value);
            module.replace_uses(ins, literal)?;
            folded += 1;
        }
        Ok(PassResult::rewrites(folded))
    }
}
