//! Execution targets and their per-program contexts.
//!
//! A [`Target`] contributes a pass pipeline and creates the [`Context`] that its
//! operators receive during evaluation. Targets register themselves by name so a
//! serialized program can recreate them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::Result;
use crate::passes::Step;
use crate::program::CompileOptions;

/// Opaque queue handle supplied by the caller for asynchronous execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// Per-target execution state injected into operator computations.
pub trait Context: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Blocks until outstanding target work completes.
    fn finish(&mut self) -> Result<()>;

    /// Makes subsequent work wait on `queue`.
    fn wait_for(&mut self, _queue: QueueHandle) -> Result<()> {
        Ok(())
    }

    /// Signals completion of this context's work on `queue`.
    fn finish_on(&mut self, _queue: QueueHandle) -> Result<()> {
        self.finish()
    }

    /// Serializable state stored alongside compiled programs.
    fn to_value(&self) -> Value {
        Value::Null
    }

    fn from_value(&mut self, _value: &Value) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Context used for constant folding and for evaluating uncompiled programs.
#[derive(Debug, Default, Clone)]
pub struct HostContext;

impl Context for HostContext {
    fn name(&self) -> &str {
        "host"
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Backend collaborator: a pass pipeline plus a context factory.
pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered pass steps run over every module assigned to this target.
    fn get_passes(&self, ctx: &mut dyn Context, options: &CompileOptions) -> Vec<Step>;

    fn get_context(&self) -> Box<dyn Context>;
}

type TargetConstructor = Box<dyn Fn() -> Arc<dyn Target> + Send + Sync>;

static TARGETS: Lazy<RwLock<HashMap<String, TargetConstructor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a target constructor under `name`, replacing any previous entry.
pub fn register_target<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn Target> + Send + Sync + 'static,
{
    TARGETS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), Box::new(constructor));
}

/// Creates a target by name. Returns `None` if it was never registered.
pub fn make_target(name: &str) -> Option<Arc<dyn Target>> {
    let registry = TARGETS.read().unwrap_or_else(PoisonError::into_inner);
    registry.get(name).map(|constructor| constructor())
}

pub fn list_targets() -> Vec<String> {
    let mut names: Vec<String> = TARGETS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}
