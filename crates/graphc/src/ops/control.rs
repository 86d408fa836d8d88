//! Operators that own sub-modules. Sub-modules see values only through their own
//! parameters, bound positionally to the forwarded inputs.

use serde::{Deserialize, Serialize};

use super::{operator_common, ModuleRunner, Operator};
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::{Module, ModuleId};
use crate::shape::{DType, Shape};

fn check_module_inputs(op: &str, module: &Module, inputs: &[Shape]) -> Result<()> {
    let params = module.get_parameter_shapes();
    if params.len() != inputs.len() {
        return Err(Error::shape(
            op,
            format!(
                "module `{}` takes {} parameter(s), {} forwarded",
                module.name(),
                params.len(),
                inputs.len()
            ),
        ));
    }
    for ((name, declared), given) in params.iter().zip(inputs) {
        let compatible = declared.dtype() == given.dtype()
            && match (declared.lens(), given.lens()) {
                (Ok(a), Ok(b)) => a == b,
                _ => declared.dyn_dims() == given.dyn_dims(),
            };
        if !compatible {
            return Err(Error::shape(
                op,
                format!("parameter `{name}` of `{}` is {declared}, got {given}", module.name()),
            ));
        }
    }
    Ok(())
}

fn single_output(op: &str, module: &Module) -> Result<Shape> {
    let mut outputs = module.get_output_shapes();
    if outputs.len() != 1 {
        return Err(Error::shape(
            op,
            format!("module `{}` must return exactly one value", module.name()),
        ));
    }
    Ok(outputs.remove(0))
}

fn take_single(op: &str, mut results: Vec<Argument>) -> Result<Argument> {
    if results.len() != 1 {
        return Err(Error::compute(
            op,
            format!("sub-module returned {} values", results.len()),
        ));
    }
    Ok(results.remove(0))
}

/// `if(cond, xs...)` runs `then` or `else` on `xs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct If {}

impl Operator for If {
    fn name(&self) -> &str {
        "if"
    }

    fn compute_shape(&self, inputs: &[Shape], modules: &[&Module]) -> Result<Shape> {
        let cond = inputs
            .first()
            .ok_or_else(|| Error::shape(self.name(), "missing condition"))?;
        if cond.dtype() != DType::Bool || cond.is_dynamic() || cond.elements()? != 1 {
            return Err(Error::shape(
                self.name(),
                format!("condition must be a single bool, got {cond}"),
            ));
        }
        let [then_module, else_module] = modules else {
            return Err(Error::shape(
                self.name(),
                format!("expected 2 sub-modules, got {}", modules.len()),
            ));
        };
        check_module_inputs(self.name(), then_module, &inputs[1..])?;
        check_module_inputs(self.name(), else_module, &inputs[1..])?;
        let then_shape = single_output(self.name(), then_module)?;
        let else_shape = single_output(self.name(), else_module)?;
        if then_shape.dtype() != else_shape.dtype()
            || then_shape.dyn_dims() != else_shape.dyn_dims()
        {
            return Err(Error::shape(
                self.name(),
                format!("branch outputs differ: {then_shape} vs {else_shape}"),
            ));
        }
        Ok(then_shape)
    }

    fn compute_with_modules(
        &self,
        _output: &Shape,
        args: &[Argument],
        modules: &[ModuleId],
        run: &mut ModuleRunner<'_>,
    ) -> Result<Argument> {
        let cond = args
            .first()
            .ok_or_else(|| Error::compute(self.name(), "missing condition"))?;
        let branch = if cond.get(0)? != 0.0 { 0 } else { 1 };
        let module = *modules
            .get(branch)
            .ok_or_else(|| Error::compute(self.name(), "missing branch module"))?;
        take_single(self.name(), run(module, args[1..].to_vec())?)
    }

    operator_common!();
}

/// Runs its sub-module on another target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOnTarget {
    pub target_id: usize,
}

impl Operator for RunOnTarget {
    fn name(&self) -> &str {
        "run_on_target"
    }

    fn compute_shape(&self, inputs: &[Shape], modules: &[&Module]) -> Result<Shape> {
        let [module] = modules else {
            return Err(Error::shape(
                self.name(),
                format!("expected 1 sub-module, got {}", modules.len()),
            ));
        };
        check_module_inputs(self.name(), module, inputs)?;
        single_output(self.name(), module)
    }

    fn compute_with_modules(
        &self,
        _output: &Shape,
        args: &[Argument],
        modules: &[ModuleId],
        run: &mut ModuleRunner<'_>,
    ) -> Result<Argument> {
        let module = *modules
            .first()
            .ok_or_else(|| Error::compute(self.name(), "missing sub-module"))?;
        take_single(self.name(), run(module, args.to_vec())?)
    }

    operator_common!();
}
