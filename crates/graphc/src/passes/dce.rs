use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;
use crate::ops::{Param, Return};

/// Erases instructions nobody uses.
///
/// Parameters and the return are always kept; without a return, the last
/// instruction is the module output and is kept as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    const NAME: &'static str = "dce";
}

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let output = match module.get_return() {
            Some(_) => None,
            None => module.last(),
        };
        let mut removed = 0usize;
        loop {
            let before = removed;
            for ins in module.instructions().into_iter().rev() {
                if !module.contains(ins) || Some(ins) == output {
                    continue;
                }
                let inst = &module[ins];
                if !inst.outputs().is_empty() || inst.op().is::<Return>() || inst.op().is::<Param>()
                {
                    continue;
                }
                module.erase(ins)?;
                removed += 1;
            }
            if removed == before {
                break;
            }
        }
        Ok(PassResult {
            changed: removed > 0,
            iterations: 0,
            rewrites_applied: 0,
            erased_insts: removed,
        })
    }
}
