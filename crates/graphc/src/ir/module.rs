use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;

use smallvec::SmallVec;

use super::instruction::{InstList, InstRef, Instruction, ModuleId};
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ops::{Literal, Operation, Outline, Param, Return};
use crate::shape::Shape;
use crate::target::HostContext;

/// Resolves sub-module handles while inserting control-flow instructions.
pub trait ModuleLookup {
    fn lookup_module(&self, id: ModuleId) -> Option<&Module>;
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    inst: Option<Instruction>,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Ordered arena of instructions forming one function-like graph.
///
/// Instructions live in slots that never move; the order is an intrusive doubly
/// linked list over slot indices. Every method that changes an input list also
/// updates the users recorded on the inputs before returning.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn handle(&self, index: u32) -> InstRef {
        InstRef {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn slot_of(&self, ins: InstRef) -> Option<&Slot> {
        self.slots
            .get(ins.index as usize)
            .filter(|slot| slot.generation == ins.generation && slot.inst.is_some())
    }

    pub fn contains(&self, ins: InstRef) -> bool {
        self.slot_of(ins).is_some()
    }

    pub fn get(&self, ins: InstRef) -> Result<&Instruction> {
        self.slot_of(ins)
            .and_then(|slot| slot.inst.as_ref())
            .ok_or_else(|| {
                Error::invalid_state(format!("stale instruction handle {ins} in `{}`", self.name))
            })
    }

    pub(crate) fn get_mut(&mut self, ins: InstRef) -> Result<&mut Instruction> {
        let name = &self.name;
        self.slots
            .get_mut(ins.index as usize)
            .filter(|slot| slot.generation == ins.generation)
            .and_then(|slot| slot.inst.as_mut())
            .ok_or_else(|| {
                Error::invalid_state(format!("stale instruction handle {ins} in `{name}`"))
            })
    }

    pub fn first(&self) -> Option<InstRef> {
        self.head.map(|index| self.handle(index))
    }

    pub fn last(&self) -> Option<InstRef> {
        self.tail.map(|index| self.handle(index))
    }

    pub fn next(&self, ins: InstRef) -> Option<InstRef> {
        self.slot_of(ins)?.next.map(|index| self.handle(index))
    }

    pub fn prev(&self, ins: InstRef) -> Option<InstRef> {
        self.slot_of(ins)?.prev.map(|index| self.handle(index))
    }

    /// Instructions in module order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            module: self,
            cursor: self.head,
        }
    }

    /// Snapshot of the current order, for passes that mutate while walking.
    pub fn instructions(&self) -> Vec<InstRef> {
        self.iter().collect()
    }

    /// Zero-based position in module order.
    pub fn position(&self, ins: InstRef) -> Option<usize> {
        self.iter().position(|candidate| candidate == ins)
    }

    fn alloc(&mut self, inst: Instruction) -> u32 {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.inst = Some(inst);
            slot.prev = None;
            slot.next = None;
            return index;
        }
        self.slots.push(Slot {
            generation: 0,
            inst: Some(inst),
            prev: None,
            next: None,
        });
        (self.slots.len() - 1) as u32
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.inst = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
    }

    /// Links `index` before `before`, or at the tail.
    fn link(&mut self, index: u32, before: Option<u32>) {
        match before {
            Some(next) => {
                let prev = self.slots[next as usize].prev;
                self.slots[index as usize].prev = prev;
                self.slots[index as usize].next = Some(next);
                self.slots[next as usize].prev = Some(index);
                match prev {
                    Some(p) => self.slots[p as usize].next = Some(index),
                    None => self.head = Some(index),
                }
            }
            None => {
                let prev = self.tail;
                self.slots[index as usize].prev = prev;
                self.slots[index as usize].next = None;
                match prev {
                    Some(p) => self.slots[p as usize].next = Some(index),
                    None => self.head = Some(index),
                }
                self.tail = Some(index);
            }
        }
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &self.slots[index as usize];
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index as usize].prev = None;
        self.slots[index as usize].next = None;
    }

    fn input_shapes(&self, inputs: &[InstRef]) -> Result<Vec<Shape>> {
        inputs
            .iter()
            .map(|&input| self.get(input).map(|inst| inst.shape.clone()))
            .collect()
    }

    fn resolve_modules<'l>(
        &self,
        modules: &[ModuleId],
        lookup: Option<&'l dyn ModuleLookup>,
    ) -> Result<Vec<&'l Module>> {
        if modules.is_empty() {
            return Ok(Vec::new());
        }
        let lookup = lookup.ok_or_else(|| {
            Error::invalid_state("sub-module handles require a module lookup")
        })?;
        modules
            .iter()
            .map(|&id| {
                lookup
                    .lookup_module(id)
                    .ok_or_else(|| Error::lookup(format!("unknown module #{}", id.index())))
            })
            .collect()
    }

    fn insert_at(
        &mut self,
        before: Option<InstRef>,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
        lookup: Option<&dyn ModuleLookup>,
    ) -> Result<InstRef> {
        let before = match before {
            Some(ins) => {
                self.get(ins)?;
                Some(ins.index)
            }
            None => None,
        };
        let sub_modules = self.resolve_modules(modules, lookup)?;
        let shape = op.compute_shape(&self.input_shapes(inputs)?, &sub_modules)?;
        let mut inst = Instruction::new(op, shape, inputs.iter().copied().collect());
        inst.module_inputs = modules.iter().copied().collect();
        let index = self.alloc(inst);
        self.link(index, before);
        let ins = self.handle(index);
        for &input in inputs {
            self.get_mut(input)?.add_output(ins);
        }
        Ok(ins)
    }

    /// Appends an instruction, running shape inference first.
    pub fn add_instruction(&mut self, op: Operation, inputs: &[InstRef]) -> Result<InstRef> {
        self.insert_at(None, op, inputs, &[], None)
    }

    /// Inserts an instruction before `before`.
    pub fn insert_instruction(
        &mut self,
        before: InstRef,
        op: Operation,
        inputs: &[InstRef],
    ) -> Result<InstRef> {
        self.insert_at(Some(before), op, inputs, &[], None)
    }

    pub fn add_instruction_with_modules(
        &mut self,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
        lookup: &dyn ModuleLookup,
    ) -> Result<InstRef> {
        self.insert_at(None, op, inputs, modules, Some(lookup))
    }

    pub fn insert_instruction_with_modules(
        &mut self,
        before: InstRef,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
        lookup: &dyn ModuleLookup,
    ) -> Result<InstRef> {
        self.insert_at(Some(before), op, inputs, modules, Some(lookup))
    }

    /// Declares a parameter after the previously declared ones.
    pub fn add_parameter(&mut self, name: impl Into<String>, shape: Shape) -> Result<InstRef> {
        let name = name.into();
        if self.get_parameter(&name).is_some() {
            return Err(Error::invalid_state(format!(
                "parameter `{name}` already declared in `{}`",
                self.name
            )));
        }
        let before = match self.iter().filter(|&ins| self[ins].name() == "@param").last() {
            Some(last_param) => self.next(last_param),
            None => self.first(),
        };
        let op = Operation::new(Param {
            parameter: name,
            shape,
        });
        self.insert_at(before, op, &[], &[], None)
    }

    /// Adds a constant at the front of the module.
    pub fn add_literal(&mut self, value: Argument) -> InstRef {
        let shape = value.shape().clone();
        let mut inst = Instruction::new(
            Operation::new(Literal {
                shape: shape.clone(),
            }),
            shape,
            SmallVec::new(),
        );
        inst.literal = Some(value);
        let index = self.alloc(inst);
        self.link(index, self.head);
        self.handle(index)
    }

    /// Adds an uninitialized buffer at the front of the module.
    pub fn add_outline(&mut self, shape: Shape) -> InstRef {
        let inst = Instruction::new(
            Operation::new(Outline {
                shape: shape.clone(),
            }),
            shape,
            SmallVec::new(),
        );
        let index = self.alloc(inst);
        self.link(index, self.head);
        self.handle(index)
    }

    /// Appends the terminal return, replacing any existing one.
    pub fn add_return(&mut self, inputs: &[InstRef]) -> Result<InstRef> {
        if let Some(previous) = self.get_return() {
            self.erase(previous)?;
        }
        self.insert_at(None, Operation::new(Return {}), inputs, &[], None)
    }

    fn replace_at(
        &mut self,
        ins: InstRef,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
        lookup: Option<&dyn ModuleLookup>,
    ) -> Result<()> {
        self.get(ins)?;
        if inputs.contains(&ins) {
            return Err(Error::invalid_state(format!(
                "instruction {ins} cannot use itself"
            )));
        }
        let sub_modules = self.resolve_modules(modules, lookup)?;
        let shape = op.compute_shape(&self.input_shapes(inputs)?, &sub_modules)?;
        self.relink(ins, op, shape, inputs, modules)
    }

    /// Swaps operator, inputs and shape of `ins`, keeping both edge directions in sync.
    ///
    /// Nothing is changed unless the new inputs keep the graph acyclic and every
    /// transitive user accepts its re-inferred input shapes.
    fn relink(
        &mut self,
        ins: InstRef,
        op: Operation,
        shape: Shape,
        inputs: &[InstRef],
        modules: &[ModuleId],
    ) -> Result<()> {
        self.check_acyclic(ins, inputs)?;
        let updates = self.downstream_shapes(ins, &shape)?;

        let old_inputs = self.get(ins)?.inputs.clone();
        for &old in &old_inputs {
            self.get_mut(old)?.remove_output(ins);
        }
        for &new in inputs {
            self.get_mut(new)?.add_output(ins);
        }
        let is_literal = op.is::<Literal>();
        let inst = self.get_mut(ins)?;
        inst.op = op;
        inst.shape = shape;
        inst.inputs = inputs.iter().copied().collect();
        inst.module_inputs = modules.iter().copied().collect();
        inst.normalized = false;
        if !is_literal {
            inst.literal = None;
        }
        for (user, user_shape) in updates {
            self.get_mut(user)?.shape = user_shape;
        }
        Ok(())
    }

    /// Fails when `ins` itself or one of its transitive users is among `inputs`.
    fn check_acyclic(&self, ins: InstRef, inputs: &[InstRef]) -> Result<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let mut reachable: HashSet<InstRef> = HashSet::from([ins]);
        let mut worklist = vec![ins];
        while let Some(current) = worklist.pop() {
            for &user in self.get(current)?.outputs.iter() {
                if reachable.insert(user) {
                    worklist.push(user);
                }
            }
        }
        match inputs.iter().find(|input| reachable.contains(input)) {
            Some(input) => Err(Error::invalid_state(format!(
                "using {input} as an input of {ins} would create a cycle"
            ))),
            None => Ok(()),
        }
    }

    /// Shapes the transitive users of `ins` take once `ins` produces `shape`.
    ///
    /// Only computes; the module is left untouched. Users owning sub-modules keep
    /// their shape.
    fn downstream_shapes(&self, ins: InstRef, shape: &Shape) -> Result<Vec<(InstRef, Shape)>> {
        if self.get(ins)?.shape == *shape {
            return Ok(Vec::new());
        }
        let mut updated: HashMap<InstRef, Shape> = HashMap::from([(ins, shape.clone())]);
        let mut changed = Vec::new();
        let mut worklist: Vec<InstRef> = self.get(ins)?.outputs.to_vec();
        while let Some(user) = worklist.pop() {
            let inst = self.get(user)?;
            if !inst.module_inputs.is_empty() {
                continue;
            }
            let input_shapes = inst
                .inputs
                .iter()
                .map(|input| match updated.get(input) {
                    Some(shape) => Ok(shape.clone()),
                    None => self.get(*input).map(|i| i.shape.clone()),
                })
                .collect::<Result<Vec<_>>>()?;
            let new_shape = inst.op.compute_shape(&input_shapes, &[])?;
            let current = updated.get(&user).unwrap_or(&inst.shape);
            if new_shape != *current {
                if !updated.contains_key(&user) {
                    changed.push(user);
                }
                updated.insert(user, new_shape);
                worklist.extend(inst.outputs.iter().copied());
            }
        }
        Ok(changed
            .into_iter()
            .filter_map(|user| updated.remove(&user).map(|shape| (user, shape)))
            .collect())
    }

    /// Replaces the operator and inputs of `ins` in place. The handle stays valid.
    pub fn replace_instruction(
        &mut self,
        ins: InstRef,
        op: Operation,
        inputs: &[InstRef],
    ) -> Result<()> {
        self.replace_at(ins, op, inputs, &[], None)
    }

    pub fn replace_instruction_with_modules(
        &mut self,
        ins: InstRef,
        op: Operation,
        inputs: &[InstRef],
        modules: &[ModuleId],
        lookup: &dyn ModuleLookup,
    ) -> Result<()> {
        self.replace_at(ins, op, inputs, modules, Some(lookup))
    }

    /// Replaces only the operator, keeping inputs.
    pub fn replace_operator(&mut self, ins: InstRef, op: Operation) -> Result<()> {
        let inst = self.get(ins)?;
        if !inst.module_inputs.is_empty() {
            return Err(Error::invalid_state(format!(
                "{ins} takes sub-modules; use replace_instruction_with_modules"
            )));
        }
        let inputs = inst.inputs.clone();
        self.replace_at(ins, op, &inputs, &[], None)
    }

    /// Rewrites every use of `old` inside `ins` to `new`.
    pub fn replace_argument(&mut self, ins: InstRef, old: InstRef, new: InstRef) -> Result<()> {
        self.get(new)?;
        let inst = self.get(ins)?;
        if !inst.inputs.contains(&old) {
            return Err(Error::invalid_state(format!("{old} is not an input of {ins}")));
        }
        if ins == new {
            return Err(Error::invalid_state(format!(
                "instruction {ins} cannot use itself"
            )));
        }
        let inputs: InstList = inst
            .inputs
            .iter()
            .map(|&input| if input == old { new } else { input })
            .collect();
        let shape = if inst.module_inputs.is_empty() {
            inst.op.compute_shape(&self.input_shapes(&inputs)?, &[])?
        } else {
            inst.shape.clone()
        };
        let op = inst.op.clone();
        let modules = inst.module_inputs.clone();
        let normalized = inst.normalized;
        self.relink(ins, op, shape, &inputs, &modules)?;
        self.get_mut(ins)?.normalized = normalized;
        Ok(())
    }

    /// Redirects every user of `old` to `new`. A user equal to `new` is left alone.
    pub fn replace_uses(&mut self, old: InstRef, new: InstRef) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.get(new)?;
        let users = self.get(old)?.outputs.clone();
        for user in users {
            if user == new {
                continue;
            }
            self.replace_argument(user, old, new)?;
        }
        Ok(())
    }

    /// Removes `ins`. Fails while it still has users.
    pub fn erase(&mut self, ins: InstRef) -> Result<()> {
        let inst = self.get(ins)?;
        if !inst.outputs.is_empty() {
            return Err(Error::Use {
                position: self.position(ins).unwrap_or_default(),
                users: inst.outputs.len(),
            });
        }
        let inputs = inst.inputs.clone();
        for input in inputs {
            self.get_mut(input)?.remove_output(ins);
        }
        self.unlink(ins.index);
        self.release(ins.index);
        Ok(())
    }

    /// Moves `ins` so it sits right before `before`.
    pub fn move_instruction(&mut self, ins: InstRef, before: InstRef) -> Result<()> {
        self.get(ins)?;
        self.get(before)?;
        if ins == before {
            return Ok(());
        }
        self.unlink(ins.index);
        self.link(ins.index, Some(before.index));
        Ok(())
    }

    pub(crate) fn set_target(&mut self, ins: InstRef, target: usize) -> Result<()> {
        self.get_mut(ins)?.target = target;
        Ok(())
    }

    pub fn set_normalized(&mut self, ins: InstRef, normalized: bool) -> Result<()> {
        self.get_mut(ins)?.normalized = normalized;
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> Option<InstRef> {
        self.iter().find(|&ins| {
            self[ins]
                .op
                .get::<Param>()
                .is_some_and(|param| param.parameter == name)
        })
    }

    /// Parameter names in declaration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.get_parameter_shapes()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn get_parameter_shapes(&self) -> Vec<(String, Shape)> {
        self.iter()
            .filter_map(|ins| {
                let inst = &self[ins];
                inst.op
                    .get::<Param>()
                    .map(|param| (param.parameter.clone(), inst.shape.clone()))
            })
            .collect()
    }

    pub fn get_return(&self) -> Option<InstRef> {
        self.iter().find(|&ins| self[ins].op.is::<Return>())
    }

    /// Shapes of the returned values; the last instruction stands in for a missing return.
    pub fn get_output_shapes(&self) -> Vec<Shape> {
        if let Some(ret) = self.get_return() {
            return self[ret]
                .inputs
                .iter()
                .filter_map(|&input| self.get(input).ok().map(|inst| inst.shape.clone()))
                .collect();
        }
        self.last()
            .map(|last| vec![self[last].shape.clone()])
            .unwrap_or_default()
    }

    /// Whether `ins` folds to a constant without any runtime input.
    pub fn can_eval(&self, ins: InstRef) -> bool {
        let mut memo = HashMap::new();
        self.can_eval_memo(ins, &mut memo)
    }

    fn can_eval_memo(&self, ins: InstRef, memo: &mut HashMap<InstRef, bool>) -> bool {
        if let Some(&known) = memo.get(&ins) {
            return known;
        }
        let Ok(inst) = self.get(ins) else {
            return false;
        };
        let result = if inst.op.is::<Literal>() {
            inst.literal.is_some()
        } else if !inst.op.is_computable() || !inst.module_inputs.is_empty() {
            false
        } else {
            inst.inputs
                .iter()
                .all(|&input| self.can_eval_memo(input, memo))
        };
        memo.insert(ins, result);
        result
    }

    /// Folds `ins` to a value on the host.
    pub fn eval_constant(&self, ins: InstRef) -> Result<Argument> {
        if !self.can_eval(ins) {
            return Err(Error::invalid_state(format!(
                "{} is not a constant expression",
                self.print_instruction(ins)
            )));
        }
        let mut ctx = HostContext::default();
        let mut values: HashMap<InstRef, Argument> = HashMap::new();
        let mut stack = vec![ins];
        while let Some(&current) = stack.last() {
            if values.contains_key(&current) {
                stack.pop();
                continue;
            }
            let inst = self.get(current)?;
            if let Some(literal) = &inst.literal {
                values.insert(current, literal.clone());
                stack.pop();
                continue;
            }
            let pending: Vec<InstRef> = inst
                .inputs
                .iter()
                .copied()
                .filter(|input| !values.contains_key(input))
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            let args = inst
                .inputs
                .iter()
                .map(|input| values[input].clone())
                .collect::<Vec<_>>();
            let value = inst.op.compute(&mut ctx, &inst.shape, &args)?;
            values.insert(current, value);
            stack.pop();
        }
        values
            .remove(&ins)
            .ok_or_else(|| Error::invalid_state("constant evaluation produced no value"))
    }

    fn display_names(&self) -> HashMap<InstRef, String> {
        self.iter()
            .enumerate()
            .map(|(position, ins)| {
                let name = match self[ins].op.get::<Param>() {
                    Some(param) => param.parameter.clone(),
                    None => format!("@{position}"),
                };
                (ins, name)
            })
            .collect()
    }

    fn format_instruction(&self, ins: InstRef, names: &HashMap<InstRef, String>) -> String {
        let Ok(inst) = self.get(ins) else {
            return format!("<stale {ins}>");
        };
        let lookup = |input: &InstRef| {
            names
                .get(input)
                .cloned()
                .unwrap_or_else(|| format!("<stale {input}>"))
        };
        let mut line = format!("{} = ", lookup(&ins));
        match (&inst.literal, inst.op.get::<Param>()) {
            (Some(literal), _) => line.push_str(&format!("@literal{literal}")),
            (None, Some(param)) => line.push_str(&format!("@param:{}", param.parameter)),
            (None, None) => line.push_str(&inst.op.to_string()),
        }
        if !inst.inputs.is_empty() {
            let args = inst.inputs.iter().map(lookup).collect::<Vec<_>>().join(", ");
            line.push_str(&format!("({args})"));
        }
        if !inst.module_inputs.is_empty() {
            let modules = inst
                .module_inputs
                .iter()
                .map(|id| format!("#{}", id.index()))
                .collect::<Vec<_>>()
                .join(", ");
            line.push_str(&format!(", [{modules}]"));
        }
        line.push_str(&format!(" -> {}", inst.shape));
        line
    }

    /// One-line rendering used in diagnostics.
    pub fn print_instruction(&self, ins: InstRef) -> String {
        self.format_instruction(ins, &self.display_names())
    }

    /// Relinks the module in exactly `order`, which must list every instruction once.
    pub(crate) fn reorder(&mut self, order: &[InstRef]) -> Result<()> {
        if order.len() != self.len || order.iter().collect::<HashSet<_>>().len() != self.len {
            return Err(Error::invalid_state("reorder must list every instruction once"));
        }
        for &ins in order {
            self.get(ins)?;
        }
        self.head = None;
        self.tail = None;
        for &ins in order {
            self.link(ins.index, None);
        }
        Ok(())
    }
}

impl Index<InstRef> for Module {
    type Output = Instruction;

    fn index(&self, ins: InstRef) -> &Instruction {
        match self.get(ins) {
            Ok(inst) => inst,
            Err(err) => panic!("{err}"),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module: \"{}\"", self.name)?;
        let names = self.display_names();
        for ins in self.iter() {
            writeln!(f, "{}", self.format_instruction(ins, &names))?;
        }
        Ok(())
    }
}

/// Iterator over a module's instructions in order.
pub struct Iter<'a> {
    module: &'a Module,
    cursor: Option<u32>,
}

impl Iterator for Iter<'_> {
    type Item = InstRef;

    fn next(&mut self) -> Option<InstRef> {
        let index = self.cursor?;
        self.cursor = self.module.slots[index as usize].next;
        Some(self.module.handle(index))
    }
}

impl<'a> IntoIterator for &'a Module {
    type Item = InstRef;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
