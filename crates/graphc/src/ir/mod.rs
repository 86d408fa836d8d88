//! Instruction graph: stable handles, the module arena and its topology checks.

mod instruction;
mod module;
mod topology;

pub use instruction::{InstRef, Instruction, ModuleId};
pub use module::{Iter, Module, ModuleLookup};
