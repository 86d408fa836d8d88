use serde::{Deserialize, Serialize};

use super::{expect_inputs, operator_common, Operator};
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::Module;
use crate::shape::Shape;
use crate::target::Context;

/// Named program input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub parameter: String,
    pub shape: Shape,
}

impl Operator for Param {
    fn name(&self) -> &str {
        "@param"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 0)?;
        Ok(self.shape.clone())
    }

    fn is_computable(&self) -> bool {
        false
    }

    operator_common!();
}

/// Constant node. The value itself lives on the instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub shape: Shape,
}

impl Operator for Literal {
    fn name(&self) -> &str {
        "@literal"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 0)?;
        Ok(self.shape.clone())
    }

    fn is_computable(&self) -> bool {
        false
    }

    operator_common!();
}

/// Uninitialized buffer of a given shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub shape: Shape,
}

impl Operator for Outline {
    fn name(&self) -> &str {
        "@outline"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 0)?;
        Ok(self.shape.clone())
    }

    fn is_computable(&self) -> bool {
        false
    }

    operator_common!();
}

/// Terminal node listing the module outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Return {}

impl Operator for Return {
    fn name(&self) -> &str {
        "@return"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        Ok(Shape::tuple(inputs.to_vec()))
    }

    fn is_computable(&self) -> bool {
        false
    }

    operator_common!();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {}

impl Operator for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 1)?;
        Ok(inputs[0].clone())
    }

    fn compute(&self, _ctx: &mut dyn Context, _output: &Shape, args: &[Argument]) -> Result<Argument> {
        args.first()
            .cloned()
            .ok_or_else(|| Error::compute(self.name(), "missing input"))
    }

    operator_common!();
}

/// Materializes its input in standard layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contiguous {}

impl Operator for Contiguous {
    fn name(&self) -> &str {
        "contiguous"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 1)?;
        let input = &inputs[0];
        if input.is_tuple() {
            return Err(Error::shape(self.name(), "tuple input"));
        }
        if input.is_dynamic() {
            return Ok(input.clone());
        }
        input.as_standard()
    }

    fn compute(&self, _ctx: &mut dyn Context, _output: &Shape, args: &[Argument]) -> Result<Argument> {
        let input = args
            .first()
            .ok_or_else(|| Error::compute(self.name(), "missing input"))?;
        input.contiguous()
    }

    operator_common!();
}
