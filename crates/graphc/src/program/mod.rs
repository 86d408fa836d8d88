//! Programs: a named set of modules plus the targets they were compiled for.
//!
//! Module `"main"` always exists and is the entry point. Control-flow
//! instructions refer to other modules of the same program through [`ModuleId`]s.

mod compile;
mod eval;
pub mod serialize;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ir::{InstRef, Module, ModuleId, ModuleLookup};
use crate::ops::Operation;
use crate::target::{Context, Target};

pub use compile::CompileOptions;
pub use eval::ExecutionEnvironment;
pub use serialize::{LoadError, FILE_FORMAT_VERSION, SOFTWARE_VERSION};

pub const MAIN_MODULE: &str = "main";

pub struct Program {
    modules: Vec<Module>,
    names: HashMap<String, ModuleId>,
    targets: Vec<Arc<dyn Target>>,
    contexts: Vec<Box<dyn Context>>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        let mut names = HashMap::new();
        names.insert(MAIN_MODULE.to_string(), ModuleId(0));
        Self {
            modules: vec![Module::new(MAIN_MODULE)],
            names,
            targets: Vec::new(),
            contexts: Vec::new(),
        }
    }

    pub fn main_id(&self) -> ModuleId {
        ModuleId(0)
    }

    pub fn main_module(&self) -> &Module {
        &self.modules[0]
    }

    pub fn main_module_mut(&mut self) -> &mut Module {
        &mut self.modules[0]
    }

    /// Adds an empty module. Names are unique within a program.
    pub fn create_module(&mut self, name: impl Into<String>) -> Result<ModuleId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(Error::invalid_state(format!("module `{name}` already exists")));
        }
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(Module::new(name.clone()));
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn get_module(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> Result<&Module> {
        self.modules
            .get(id.index())
            .ok_or_else(|| Error::lookup(format!("unknown module #{}", id.index())))
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Result<&mut Module> {
        self.modules
            .get_mut(id.index())
            .ok_or_else(|| Error::lookup(format!("unknown module #{}", id.index())))
    }

    /// Modules in creation order; `main` comes first.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> + '_ {
        self.modules
            .iter()
            .enumerate()
            .map(|(index, module)| (ModuleId(index as u32), module))
    }

    pub fn targets(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    pub fn contexts(&self) -> &[Box<dyn Context>] {
        &self.contexts
    }

    pub fn context_mut(&mut self, target: usize) -> Option<&mut dyn Context> {
        match self.contexts.get_mut(target) {
            Some(ctx) => Some(ctx.as_mut()),
            None => None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Runs `f` on module `id` while the rest of the program serves as module lookup.
    fn with_module<R>(
        &mut self,
        id: ModuleId,
        f: impl FnOnce(&mut Module, &Program) -> Result<R>,
    ) -> Result<R> {
        let slot = self.module_mut(id)?;
        let mut module = std::mem::take(slot);
        let result = f(&mut module, self);
        self.modules[id.index()] = module;
        result
    }

    /// Appends a control-flow instruction to module `id`.
    pub fn add_instruction_with_modules(
        &mut self,
        id: ModuleId,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
    ) -> Result<InstRef> {
        self.with_module(id, |module, lookup| {
            module.add_instruction_with_modules(op, inputs, modules, lookup)
        })
    }

    pub fn insert_instruction_with_modules(
        &mut self,
        id: ModuleId,
        before: InstRef,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
    ) -> Result<InstRef> {
        self.with_module(id, |module, lookup| {
            module.insert_instruction_with_modules(before, op, inputs, modules, lookup)
        })
    }

    pub fn replace_instruction_with_modules(
        &mut self,
        id: ModuleId,
        ins: InstRef,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
    ) -> Result<()> {
        self.with_module(id, |module, lookup| {
            module.replace_instruction_with_modules(ins, op, inputs, modules, lookup)
        })
    }

    /// Modules reachable from `main` through sub-module references, `main` first.
    pub fn reachable_modules(&self) -> Result<Vec<ModuleId>> {
        let mut seen = vec![false; self.modules.len()];
        let mut order = Vec::new();
        let mut stack = vec![self.main_id()];
        while let Some(id) = stack.pop() {
            let module = self.module(id)?;
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            order.push(id);
            for ins in module.iter() {
                for &sub in module[ins].module_inputs().iter().rev() {
                    self.module(sub)?;
                    stack.push(sub);
                }
            }
        }
        Ok(order)
    }

    /// Sorts every module topologically.
    pub fn sort(&mut self) -> Result<()> {
        self.modules.iter_mut().try_for_each(Module::sort)
    }
}

impl ModuleLookup for Program {
    fn lookup_module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.index())
    }
}

impl ModuleLookup for [Module] {
    fn lookup_module(&self, id: ModuleId) -> Option<&Module> {
        self.get(id.index())
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("modules", &self.modules.iter().map(Module::name).collect::<Vec<_>>())
            .field("targets", &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.modules {
            write!(f, "{module}")?;
        }
        Ok(())
    }
}
