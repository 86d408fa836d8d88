use std::fmt;

use smallvec::SmallVec;

use crate::argument::Argument;
use crate::ops::Operation;
use crate::shape::Shape;

/// Stable handle to an instruction inside a [`Module`](super::Module).
///
/// Handles stay valid across insertions and removals of other instructions. A
/// handle to an erased instruction is detected through its generation and never
/// aliases a later instruction that reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for InstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// Handle to a module owned by a [`Program`](crate::program::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) type InstList = SmallVec<[InstRef; 4]>;

/// One graph node. Edges are only changed through [`Module`](super::Module) methods.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) op: Operation,
    pub(crate) shape: Shape,
    pub(crate) literal: Option<Argument>,
    pub(crate) inputs: InstList,
    pub(crate) module_inputs: SmallVec<[ModuleId; 2]>,
    pub(crate) outputs: InstList,
    pub(crate) normalized: bool,
    pub(crate) target: usize,
}

impl Instruction {
    pub(crate) fn new(op: Operation, shape: Shape, inputs: InstList) -> Self {
        Self {
            op,
            shape,
            literal: None,
            inputs,
            module_inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            normalized: false,
            target: 0,
        }
    }

    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub fn name(&self) -> &str {
        self.op.name()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn literal(&self) -> Option<&Argument> {
        self.literal.as_ref()
    }

    pub fn inputs(&self) -> &[InstRef] {
        &self.inputs
    }

    pub fn module_inputs(&self) -> &[ModuleId] {
        &self.module_inputs
    }

    /// Users of this instruction, each listed once.
    pub fn outputs(&self) -> &[InstRef] {
        &self.outputs
    }

    pub fn normalized(&self) -> bool {
        self.normalized
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub(crate) fn add_output(&mut self, user: InstRef) {
        if !self.outputs.contains(&user) {
            self.outputs.push(user);
        }
    }

    pub(crate) fn remove_output(&mut self, user: InstRef) {
        self.outputs.retain(|o| *o != user);
    }
}
