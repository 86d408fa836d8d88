use std::collections::HashSet;

use super::instruction::InstRef;
use super::module::Module;
use crate::error::Result;
use crate::ops::Return;

impl Module {
    /// Reorders instructions so every input precedes its users.
    ///
    /// Depth-first post-order over inputs, visiting roots in the current order.
    /// The return instruction is kept last.
    pub fn sort(&mut self) -> Result<()> {
        let current = self.instructions();
        let mut visited: HashSet<InstRef> = HashSet::with_capacity(current.len());
        let mut order = Vec::with_capacity(current.len());
        let mut ret = None;
        for &root in &current {
            if self.get(root)?.op().is::<Return>() {
                ret = Some(root);
                continue;
            }
            self.post_order(root, &mut visited, &mut order)?;
        }
        if let Some(ret) = ret {
            self.post_order(ret, &mut visited, &mut order)?;
        }
        self.reorder(&order)
    }

    fn post_order(
        &self,
        root: InstRef,
        visited: &mut HashSet<InstRef>,
        order: &mut Vec<InstRef>,
    ) -> Result<()> {
        if !visited.insert(root) {
            return Ok(());
        }
        let mut stack: Vec<(InstRef, usize)> = vec![(root, 0)];
        while let Some((ins, child)) = stack.pop() {
            let inputs = self.get(ins)?.inputs();
            if let Some(&input) = inputs.get(child) {
                stack.push((ins, child + 1));
                if self.contains(input) && visited.insert(input) {
                    stack.push((input, 0));
                }
            } else {
                order.push(ins);
            }
        }
        Ok(())
    }

    /// First instruction that breaks def-before-use ordering or edge consistency.
    ///
    /// An instruction is reported when an input is stale or appears later, when
    /// its input and user edges are not mirrored, when its cached shape differs
    /// from re-running shape inference, or when it is a return that is not last.
    pub fn validate(&self) -> Option<InstRef> {
        let mut seen: HashSet<InstRef> = HashSet::with_capacity(self.len());
        let last = self.last();
        for ins in self.iter() {
            let inst = &self[ins];
            for &input in inst.inputs() {
                if !seen.contains(&input) {
                    return Some(ins);
                }
                if !self[input].outputs().contains(&ins) {
                    return Some(ins);
                }
            }
            if self.has_dangling_output(ins) {
                return Some(ins);
            }
            if inst.op().is::<Return>() && Some(ins) != last {
                return Some(ins);
            }
            if inst.module_inputs().is_empty() {
                let shapes: Vec<_> = inst
                    .inputs()
                    .iter()
                    .map(|&input| self[input].shape().clone())
                    .collect();
                match inst.op().compute_shape(&shapes, &[]) {
                    Ok(shape) if &shape == inst.shape() => {}
                    _ => return Some(ins),
                }
            }
            seen.insert(ins);
        }
        None
    }

    /// First instruction whose recorded users do not actually use it.
    pub fn find_dangling_reference(&self) -> Option<InstRef> {
        self.iter().find(|&ins| self.has_dangling_output(ins))
    }

    fn has_dangling_output(&self, ins: InstRef) -> bool {
        self[ins].outputs().iter().any(|&user| match self.get(user) {
            Ok(inst) => !inst.inputs().contains(&ins),
            Err(_) => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::Module;
    use crate::ops::{Add, Neg, Operation};
    use crate::shape::{DType, Shape};

    fn chain() -> (Module, [crate::ir::InstRef; 4]) {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", Shape::new(DType::F32, [2, 3])).unwrap();
        let y = m.add_parameter("y", Shape::new(DType::F32, [2, 3])).unwrap();
        let sum = m.add_instruction(Operation::new(Add {}), &[x, y]).unwrap();
        let neg = m.add_instruction(Operation::new(Neg {}), &[sum]).unwrap();
        m.add_return(&[neg]).unwrap();
        (m, [x, y, sum, neg])
    }

    #[test]
    fn consistent_module_has_no_violation() {
        let (m, _) = chain();
        assert_eq!(m.validate(), None);
        assert_eq!(m.find_dangling_reference(), None);
    }

    #[test]
    fn forgotten_back_edge_is_reported() {
        let (mut m, [_, y, sum, neg]) = chain();
        // Rewire `neg` to read `y` without touching the users recorded on `sum` and `y`.
        m.get_mut(neg).unwrap().inputs = [y].into_iter().collect();
        assert_eq!(m.find_dangling_reference(), Some(sum));
        assert_eq!(m.validate(), Some(sum));
    }

    #[test]
    fn stale_user_is_dangling() {
        let (mut m, [x, _, sum, _]) = chain();
        m.get_mut(x).unwrap().outputs.push(sum);
        m.get_mut(sum).unwrap().inputs.clear();
        assert_eq!(m.find_dangling_reference(), Some(x));
    }

    #[test]
    fn use_before_definition_is_reported() {
        let (mut m, [_, _, sum, neg]) = chain();
        m.move_instruction(neg, sum).unwrap();
        assert_eq!(m.validate(), Some(neg));
        m.sort().unwrap();
        assert_eq!(m.validate(), None);
    }
}
