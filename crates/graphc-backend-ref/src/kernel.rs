use serde::{Deserialize, Serialize};
use serde_json::Value;

use graphc::argument::Argument;
use graphc::ir::Module;
use graphc::ops::Operator;
use graphc::passes::{Pass, PassResult};
use graphc::target::Context;
use graphc::{Operation, Result, Shape};

use crate::target::RefContext;

pub const KERNEL_NAME: &str = "ref::kernel";

/// A lowered operator. Shape inference and the computation are the wrapped
/// operator's; running it is recorded as one launch on the [`RefContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kernel {
    pub op: Operation,
}

impl Kernel {
    pub fn new(op: Operation) -> Self {
        Self { op }
    }
}

impl Operator for Kernel {
    fn name(&self) -> &str {
        KERNEL_NAME
    }

    fn compute_shape(&self, inputs: &[Shape], modules: &[&Module]) -> Result<Shape> {
        self.op.compute_shape(inputs, modules)
    }

    fn compute(&self, ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        if let Some(reference) = ctx.as_any_mut().downcast_mut::<RefContext>() {
            reference.launches += 1;
        }
        self.op.compute(ctx, output, args)
    }

    fn finalize(&self, ctx: &mut dyn Context, output: &Shape, inputs: &[Shape]) -> Result<()> {
        self.op.finalize(ctx, output, inputs)
    }

    fn is_movement(&self) -> bool {
        self.op.is_movement()
    }

    fn is_computable(&self) -> bool {
        self.op.is_computable()
    }

    fn attributes(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Wraps every remaining computable operator into a [`Kernel`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LowerToRef;

impl Pass for LowerToRef {
    fn name(&self) -> &'static str {
        "lower_to_ref"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let mut lowered = 0usize;
        for ins in module.instructions() {
            let inst = &module[ins];
            let op = inst.op();
            if op.is_builtin()
                || op.is::<Kernel>()
                || !op.is_computable()
                || !inst.module_inputs().is_empty()
            {
                continue;
            }
            let kernel = Operation::new(Kernel::new(op.clone()));
            module.replace_operator(ins, kernel)?;
            module.set_normalized(ins, true)?;
            lowered += 1;
        }
        Ok(PassResult {
            changed: lowered > 0,
            iterations: 1,
            rewrites_applied: lowered,
            erased_insts: 0,
        })
    }
}
