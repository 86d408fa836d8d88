//! Operator capability trait and the shared [`Operation`] handle.
//!
//! Every operator kind implements [`Operator`]: a name, shape inference, an optional
//! host computation, and an attribute dump used for equality, printing and
//! serialization. Operators are looked up by name through the registry in
//! [`registry`], which is how programs are rebuilt from their serialized form.

mod builtin;
mod control;
mod movement;
mod pointwise;
pub mod registry;

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::{Module, ModuleId};
use crate::shape::Shape;
use crate::target::Context;

pub use builtin::{Contiguous, Identity, Literal, Outline, Param, Return};
pub use control::{If, RunOnTarget};
pub use movement::{Broadcast, Flatten, MultiBroadcast, Reshape, Squeeze, Transpose, Unsqueeze};
pub use pointwise::{Abs, Add, Convert, Div, Exp, Max, Min, Mul, Neg, Relu, Sqrt, Sub};
pub use registry::{has_op, make_op, operator_names, register_operator, register_operator_with};

/// Callback used by control-flow operators to evaluate one of their sub-modules.
pub type ModuleRunner<'a> = dyn FnMut(ModuleId, Vec<Argument>) -> Result<Vec<Argument>> + 'a;

/// Capability interface implemented by every operator kind.
pub trait Operator: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Output shape for the given inputs, or a shape error.
    fn compute_shape(&self, inputs: &[Shape], modules: &[&Module]) -> Result<Shape>;

    /// Host computation.
    fn compute(&self, _ctx: &mut dyn Context, _output: &Shape, _args: &[Argument]) -> Result<Argument> {
        Err(Error::compute(self.name(), "operator has no host implementation"))
    }

    /// Computation for operators that own sub-modules.
    fn compute_with_modules(
        &self,
        _output: &Shape,
        _args: &[Argument],
        _modules: &[ModuleId],
        _run: &mut ModuleRunner<'_>,
    ) -> Result<Argument> {
        Err(Error::compute(self.name(), "operator does not take sub-modules"))
    }

    /// Returns a canonical replacement (e.g. negative axes resolved), if any.
    fn normalize(&self, _inputs: &[Shape]) -> Result<Option<Operation>> {
        Ok(None)
    }

    /// One-time preparation against the target context after compilation.
    fn finalize(&self, _ctx: &mut dyn Context, _output: &Shape, _inputs: &[Shape]) -> Result<()> {
        Ok(())
    }

    /// Layout-only operators: the output aliases input 0 with new lens/strides.
    fn is_movement(&self) -> bool {
        false
    }

    /// Whether `compute` can be called for constant evaluation.
    fn is_computable(&self) -> bool {
        true
    }

    fn attributes(&self) -> Value;

    fn as_any(&self) -> &dyn Any;
}

/// Expands the two boilerplate methods shared by serde-backed operators.
macro_rules! operator_common {
    () => {
        fn attributes(&self) -> serde_json::Value {
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    };
}
pub(crate) use operator_common;

/// Cheaply clonable handle to an operator value.
#[derive(Clone)]
pub struct Operation(Arc<dyn Operator>);

impl Operation {
    pub fn new<T: Operator>(op: T) -> Self {
        Operation(Arc::new(op))
    }

    pub fn get<T: Operator>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Operator>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Builtin pseudo-operators (`@param`, `@literal`, `@outline`, `@return`).
    pub fn is_builtin(&self) -> bool {
        self.name().starts_with('@')
    }
}

impl Deref for Operation {
    type Target = dyn Operator;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.attributes() == other.attributes()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self.attributes() {
            Value::Object(map) if !map.is_empty() => {
                let fields = map
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "[{fields}]")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OperationRepr {
    name: String,
    #[serde(default)]
    attributes: Value,
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        OperationRepr {
            name: self.name().to_string(),
            attributes: self.attributes(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = OperationRepr::deserialize(deserializer)?;
        make_op(&repr.name, &repr.attributes).map_err(D::Error::custom)
    }
}

/// Shared arity check used by shape inference.
pub(crate) fn expect_inputs(op: &str, inputs: &[Shape], count: usize) -> Result<()> {
    if inputs.len() != count {
        return Err(Error::shape(
            op,
            format!("expected {count} input(s), got {}", inputs.len()),
        ));
    }
    Ok(())
}

/// Resolves a possibly negative axis against `rank` (`rank` itself allowed when `inclusive`).
pub(crate) fn normalize_axis(op: &str, axis: i64, rank: usize, inclusive: bool) -> Result<usize> {
    let bound = (if inclusive { rank + 1 } else { rank }) as i64;
    let resolved = if axis < 0 { axis + bound } else { axis };
    if resolved < 0 || resolved >= bound {
        return Err(Error::shape(
            op,
            format!("axis {axis} out of range for rank {rank}"),
        ));
    }
    Ok(resolved as usize)
}
