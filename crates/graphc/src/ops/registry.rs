//! Name-keyed operator registry.
//!
//! Builtin operators are registered on first use. Target crates add their own
//! operators with [`register_operator`] before loading programs that mention them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    Abs, Add, Broadcast, Contiguous, Convert, Div, Exp, Flatten, Identity, If, Literal, Max, Min,
    Mul, MultiBroadcast, Neg, Operation, Operator, Outline, Param, Relu, Reshape, Return,
    RunOnTarget, Sqrt, Squeeze, Sub, Transpose, Unsqueeze,
};
use crate::error::{Error, Result};

/// Builds an operation from its serialized attributes.
pub type OperatorFactory = Box<dyn Fn(&Value) -> Result<Operation> + Send + Sync>;

static OPERATORS: Lazy<RwLock<HashMap<String, OperatorFactory>>> =
    Lazy::new(|| RwLock::new(builtin_factories()));

fn factory_for<T: Operator + DeserializeOwned>() -> OperatorFactory {
    Box::new(|attributes: &Value| {
        let attributes = match attributes {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value::<T>(attributes)
            .map(Operation::new)
            .map_err(|err| Error::invalid_state(format!("invalid operator attributes: {err}")))
    })
}

fn builtin_factories() -> HashMap<String, OperatorFactory> {
    let mut map: HashMap<String, OperatorFactory> = HashMap::new();
    macro_rules! add {
        ($name:expr, $ty:ty) => {
            map.insert($name.to_string(), factory_for::<$ty>());
        };
    }
    add!("@param", Param);
    add!("@literal", Literal);
    add!("@outline", Outline);
    add!("@return", Return);
    add!("identity", Identity);
    add!("contiguous", Contiguous);
    add!("add", Add);
    add!("sub", Sub);
    add!("mul", Mul);
    add!("div", Div);
    add!("max", Max);
    add!("min", Min);
    add!("neg", Neg);
    add!("abs", Abs);
    add!("relu", Relu);
    add!("exp", Exp);
    add!("sqrt", Sqrt);
    add!("convert", Convert);
    add!("reshape", Reshape);
    add!("transpose", Transpose);
    add!("broadcast", Broadcast);
    add!("multibroadcast", MultiBroadcast);
    add!("squeeze", Squeeze);
    add!("unsqueeze", Unsqueeze);
    add!("flatten", Flatten);
    add!("if", If);
    add!("run_on_target", RunOnTarget);
    map
}

/// Registers a serde-backed operator under `name`, replacing any previous entry.
pub fn register_operator<T: Operator + DeserializeOwned>(name: impl Into<String>) {
    register_operator_with(name, factory_for::<T>());
}

pub fn register_operator_with(name: impl Into<String>, factory: OperatorFactory) {
    OPERATORS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), factory);
}

/// Creates the operator registered as `name` from its attribute object.
pub fn make_op(name: &str, attributes: &Value) -> Result<Operation> {
    let registry = OPERATORS.read().unwrap_or_else(PoisonError::into_inner);
    let factory = registry
        .get(name)
        .ok_or_else(|| Error::lookup(format!("unknown operator `{name}`")))?;
    factory(attributes)
}

pub fn has_op(name: &str) -> bool {
    OPERATORS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(name)
}

pub fn operator_names() -> Vec<String> {
    let mut names: Vec<String> = OPERATORS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}
