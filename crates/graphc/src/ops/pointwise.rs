//! Elementwise operators. Inputs must agree exactly on lens and type; broadcasting
//! is spelled out with explicit `multibroadcast` nodes.

use serde::{Deserialize, Serialize};

use super::{expect_inputs, operator_common, Operator};
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::Module;
use crate::shape::{DType, Shape};
use crate::target::Context;

fn elementwise_shape(op: &str, inputs: &[Shape]) -> Result<Shape> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::shape(op, "expected at least one input"))?;
    if inputs.iter().any(Shape::is_tuple) {
        return Err(Error::shape(op, "tuple inputs are not elementwise"));
    }
    if let Some(other) = inputs.iter().find(|s| s.dtype() != first.dtype()) {
        return Err(Error::shape(
            op,
            format!("type mismatch: {} vs {}", first.dtype(), other.dtype()),
        ));
    }
    if inputs.iter().any(Shape::is_dynamic) {
        let dims = first.dyn_dims();
        if inputs.iter().any(|s| s.dyn_dims() != dims) {
            return Err(Error::shape(op, "dynamic dimensions differ"));
        }
        return Ok(Shape::dynamic(first.dtype(), dims));
    }
    let lens = first.lens()?;
    for other in &inputs[1..] {
        if other.lens()? != lens {
            return Err(Error::shape(
                op,
                format!("lens mismatch: {:?} vs {:?}", lens, other.lens()?),
            ));
        }
    }
    Ok(Shape::new(first.dtype(), lens.to_vec()))
}

fn first_arg<'a>(op: &str, args: &'a [Argument]) -> Result<&'a Argument> {
    args.first()
        .ok_or_else(|| Error::compute(op, "missing input"))
}

macro_rules! binary_op {
    ($(#[$meta:meta])* $ty:ident, $name:literal, |$a:ident, $b:ident| $body:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $ty {}

        impl Operator for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
                expect_inputs(self.name(), inputs, 2)?;
                elementwise_shape(self.name(), inputs)
            }

            fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
                if args.len() != 2 {
                    return Err(Error::compute(self.name(), "expected two inputs"));
                }
                args[0].zip_map(&args[1], output.dtype(), |$a, $b| $body)
            }

            operator_common!();
        }
    };
}

macro_rules! unary_op {
    ($ty:ident, $name:literal, |$x:ident| $body:expr) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $ty {}

        impl Operator for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
                expect_inputs(self.name(), inputs, 1)?;
                elementwise_shape(self.name(), inputs)
            }

            fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
                first_arg(self.name(), args)?.map(output.dtype(), |$x| $body)
            }

            operator_common!();
        }
    };
}

binary_op!(Add, "add", |a, b| a + b);
binary_op!(Sub, "sub", |a, b| a - b);
binary_op!(Mul, "mul", |a, b| a * b);
binary_op!(
    /// Integer division truncates toward zero.
    Div,
    "div",
    |a, b| a / b
);
binary_op!(Max, "max", |a, b| a.max(b));
binary_op!(Min, "min", |a, b| a.min(b));

unary_op!(Neg, "neg", |x| -x);
unary_op!(Abs, "abs", |x| x.abs());
unary_op!(Relu, "relu", |x| x.max(0.0));
unary_op!(Exp, "exp", |x| x.exp());
unary_op!(Sqrt, "sqrt", |x| x.sqrt());

/// Element type conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convert {
    pub target_type: DType,
}

impl Operator for Convert {
    fn name(&self) -> &str {
        "convert"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        expect_inputs(self.name(), inputs, 1)?;
        if self.target_type == DType::Tuple {
            return Err(Error::shape(self.name(), "cannot convert to tuple"));
        }
        let input = elementwise_shape(self.name(), inputs)?;
        Ok(input.with_type(self.target_type))
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        first_arg(self.name(), args)?.map(output.dtype(), |x| x)
    }

    operator_common!();
}
