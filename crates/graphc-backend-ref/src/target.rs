use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use graphc::passes::{
    DeadCodeElimination, EliminateContiguous, EliminateIdentity, NormalizeOps, PipelineBuilder,
    PropagateConstant, SimplifyAlgebra, SimplifyReshapes, Step,
};
use graphc::target::{Context, Target};
use graphc::{CompileOptions, Error, Result};

use crate::kernel::LowerToRef;

pub const TARGET_NAME: &str = "ref";

/// Host execution state: counts kernel launches and synchronizations.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefContext {
    pub launches: usize,
    pub finishes: usize,
}

impl Context for RefContext {
    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn finish(&mut self) -> Result<()> {
        self.finishes += 1;
        Ok(())
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn from_value(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        *self = serde_json::from_value(value.clone())
            .map_err(|err| Error::invalid_state(format!("invalid ref context: {err}")))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RefTarget;

impl RefTarget {
    pub fn new() -> Self {
        Self
    }
}

impl Target for RefTarget {
    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn get_passes(&self, _ctx: &mut dyn Context, options: &CompileOptions) -> Vec<Step> {
        let mut pipeline = PipelineBuilder::new();
        pipeline
            .pass(NormalizeOps)
            .fixed_point(options.fixed_point_iters, |inner| {
                inner
                    .pass(DeadCodeElimination)
                    .pass(EliminateIdentity)
                    .pass(SimplifyAlgebra)
                    .pass(SimplifyReshapes)
                    .pass(EliminateContiguous);
            })
            .pass(PropagateConstant)
            .pass(DeadCodeElimination)
            .pass(LowerToRef)
            .pass(DeadCodeElimination);
        pipeline.finish()
    }

    fn get_context(&self) -> Box<dyn Context> {
        Box::new(RefContext::default())
    }
}
