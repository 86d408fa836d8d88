use std::collections::HashMap;

use super::Program;
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::{InstRef, Module, ModuleId};
use crate::ops::{Outline, Param, Return};
use crate::shape::Shape;
use crate::target::{Context, HostContext, QueueHandle};

/// How an evaluation synchronizes with the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    /// Caller-owned queue the evaluation is ordered against.
    pub queue: Option<QueueHandle>,
    /// Leave completion to `finish_on(queue)` instead of blocking in `finish`.
    pub run_async: bool,
}

impl Program {
    /// Evaluates `main` with `params` bound by name.
    pub fn eval(&mut self, params: &HashMap<String, Argument>) -> Result<Vec<Argument>> {
        self.eval_with(params, ExecutionEnvironment::default())
    }

    pub fn eval_with(
        &mut self,
        params: &HashMap<String, Argument>,
        env: ExecutionEnvironment,
    ) -> Result<Vec<Argument>> {
        let main_id = self.main_id();
        let main = self.main_module();
        let mut bindings = HashMap::new();
        for (name, declared) in main.get_parameter_shapes() {
            let value = params
                .get(&name)
                .ok_or_else(|| Error::lookup(format!("missing parameter `{name}`")))?;
            check_binding(&name, &declared, value)?;
            bindings.insert(name, value.clone());
        }

        let queue = env.queue.filter(|_| env.run_async);
        if let Some(queue) = queue {
            for ctx in &mut self.contexts {
                ctx.wait_for(queue)?;
            }
        }
        let mut host = HostContext;
        let results = run_module(
            &self.modules,
            &mut self.contexts,
            &mut host,
            main_id,
            bindings,
        )?;
        for ctx in &mut self.contexts {
            match queue {
                Some(queue) => ctx.finish_on(queue)?,
                None => ctx.finish()?,
            }
        }
        Ok(results)
    }
}

/// Rejects a value whose type or extents disagree with the declared parameter.
fn check_binding(name: &str, declared: &Shape, value: &Argument) -> Result<()> {
    let given = value.shape();
    let fits = declared.dtype() == given.dtype()
        && match (declared.is_dynamic(), given.lens()) {
            (false, Ok(lens)) => declared.lens().is_ok_and(|want| want == lens),
            (true, Ok(lens)) => {
                let dims = declared.dyn_dims();
                dims.len() == lens.len() && dims.iter().zip(lens).all(|(d, &len)| d.contains(len))
            }
            (_, Err(_)) => false,
        };
    if fits {
        Ok(())
    } else {
        Err(Error::lookup(format!(
            "parameter `{name}` expects {declared}, got {given}"
        )))
    }
}

/// Binds `args` to the parameters of `module` in declaration order.
fn positional_bindings(module: &Module, args: Vec<Argument>) -> Result<HashMap<String, Argument>> {
    let params = module.get_parameter_shapes();
    if params.len() != args.len() {
        return Err(Error::lookup(format!(
            "module `{}` takes {} parameter(s), {} given",
            module.name(),
            params.len(),
            args.len()
        )));
    }
    params
        .into_iter()
        .zip(args)
        .map(|((name, declared), value)| {
            check_binding(&name, &declared, &value)?;
            Ok((name, value))
        })
        .collect()
}

fn run_module(
    modules: &[Module],
    contexts: &mut [Box<dyn Context>],
    host: &mut HostContext,
    id: ModuleId,
    bindings: HashMap<String, Argument>,
) -> Result<Vec<Argument>> {
    let module = modules
        .get(id.index())
        .ok_or_else(|| Error::lookup(format!("unknown module #{}", id.index())))?;
    tracing::trace!(module = module.name(), "evaluating module");
    let mut values: HashMap<InstRef, Argument> = HashMap::new();
    let mut last = None;
    for ins in module.iter() {
        let inst = &module[ins];
        let args = inst
            .inputs()
            .iter()
            .map(|input| {
                values.get(input).cloned().ok_or_else(|| {
                    Error::invalid_state(format!(
                        "{} uses a value not computed yet",
                        module.print_instruction(ins)
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if inst.op().is::<Return>() {
            return Ok(args);
        }
        let value = if let Some(param) = inst.op().get::<Param>() {
            bindings
                .get(&param.parameter)
                .cloned()
                .ok_or_else(|| Error::lookup(format!("missing parameter `{}`", param.parameter)))?
        } else if let Some(literal) = inst.literal() {
            literal.clone()
        } else if inst.op().is::<Outline>() {
            Argument::zeros(inst.shape())?
        } else if !inst.module_inputs().is_empty() {
            let mut run = |sub: ModuleId, sub_args: Vec<Argument>| -> Result<Vec<Argument>> {
                let sub_module = modules
                    .get(sub.index())
                    .ok_or_else(|| Error::lookup(format!("unknown module #{}", sub.index())))?;
                let sub_bindings = positional_bindings(sub_module, sub_args)?;
                run_module(modules, &mut *contexts, &mut *host, sub, sub_bindings)
            };
            inst.op()
                .compute_with_modules(inst.shape(), &args, inst.module_inputs(), &mut run)?
        } else {
            let ctx: &mut dyn Context = if contexts.is_empty() {
                &mut *host
            } else {
                contexts
                    .get_mut(inst.target())
                    .ok_or_else(|| {
                        Error::invalid_state(format!("no context for target {}", inst.target()))
                    })?
                    .as_mut()
            };
            inst.op().compute(ctx, inst.shape(), &args)?
        };
        values.insert(ins, value);
        last = Some(ins);
    }
    Ok(last
        .and_then(|ins| values.remove(&ins))
        .into_iter()
        .collect())
}
