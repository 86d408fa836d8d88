//! Symbolic model of a shape flowing through layout operators.
//!
//! A [`ShapeTransformDescriptor`] starts from the extents of an input tensor. Each
//! current output axis is a [`Dimension`] made of [`SubDimension`]s; every
//! sub-dimension records which slice of which input axis it came from:
//!
//! - `axis == [a]`: all of input axis `a`,
//! - `axis == [a, k]`: the `k`-th piece of input axis `a` after a split,
//! - `axis == []`: introduced by a broadcast. `hidden_axis` remembers the input
//!   axis when a size-1 input axis was broadcast over.
//!
//! Applying reshape/transpose/broadcast operators only rearranges this provenance,
//! so a chain of them can be replaced by the short sequence [`generate`] emits.
//!
//! [`generate`]: ShapeTransformDescriptor::generate

mod generate;
mod simplify;

use std::fmt;

use crate::error::{Error, Result};
use crate::ops::{Broadcast, MultiBroadcast, Operation, Transpose};
use crate::shape::{is_permutation, DType, Shape};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubDimension {
    pub len: usize,
    pub axis: Vec<usize>,
    pub hidden_axis: Option<Vec<usize>>,
}

impl SubDimension {
    pub fn new(len: usize, axis: Vec<usize>) -> Self {
        Self {
            len,
            axis,
            hidden_axis: None,
        }
    }

    pub fn broadcast(len: usize) -> Self {
        Self::new(len, Vec::new())
    }

    pub fn is_broadcast(&self) -> bool {
        self.axis.is_empty()
    }

    /// Input axis this sub-dimension originates from, including hidden ones.
    pub fn origin(&self) -> Option<usize> {
        self.axis
            .first()
            .or_else(|| self.hidden_axis.as_ref().and_then(|hidden| hidden.first()))
            .copied()
    }

    fn split(&self, first: usize) -> (SubDimension, SubDimension) {
        let piece = |k: usize, len: usize| {
            if self.axis.is_empty() {
                SubDimension::broadcast(len)
            } else {
                let mut axis = self.axis.clone();
                axis.push(k);
                SubDimension::new(len, axis)
            }
        };
        let mut head = piece(0, first);
        head.hidden_axis = self.hidden_axis.clone();
        (head, piece(1, self.len / first))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dimension {
    pub subdimensions: Vec<SubDimension>,
}

impl Dimension {
    pub fn len(&self) -> usize {
        self.subdimensions.iter().map(|s| s.len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.subdimensions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeTransformDescriptor {
    dimensions: Vec<Dimension>,
    input_lens: Vec<usize>,
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl ShapeTransformDescriptor {
    /// Identity descriptor for an input of extents `lens`.
    pub fn new(lens: &[usize]) -> Self {
        Self {
            dimensions: lens
                .iter()
                .enumerate()
                .map(|(axis, &len)| Dimension {
                    subdimensions: vec![SubDimension::new(len, vec![axis])],
                })
                .collect(),
            input_lens: lens.to_vec(),
        }
    }

    /// Descriptor for `ops` applied to an input of extents `lens`, if representable.
    pub fn create(lens: &[usize], ops: &[Operation]) -> Option<Self> {
        let mut descriptor = Self::new(lens);
        descriptor.apply(ops).then_some(descriptor)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn input_lens(&self) -> &[usize] {
        &self.input_lens
    }

    pub fn rank(&self) -> usize {
        self.input_lens.len()
    }

    pub fn lens(&self) -> Vec<usize> {
        self.dimensions.iter().map(Dimension::len).collect()
    }

    pub fn elements(&self) -> usize {
        self.lens().iter().product()
    }

    /// Applies `ops` in order. On `false` the descriptor is left unchanged and the
    /// chain has to be kept as it is.
    pub fn apply(&mut self, ops: &[Operation]) -> bool {
        let mut next = self.clone();
        for op in ops {
            if !next.apply_op(op) {
                return false;
            }
        }
        *self = next;
        true
    }

    fn apply_op(&mut self, op: &Operation) -> bool {
        let elements = self.elements();
        let applied = match op.name() {
            "contiguous" => return true,
            "transpose" => op
                .get::<Transpose>()
                .is_some_and(|t| self.apply_transpose(&t.permutation)),
            "multibroadcast" => {
                return op
                    .get::<MultiBroadcast>()
                    .is_some_and(|b| self.apply_multibroadcast(&b.out_lens))
            }
            "broadcast" => {
                return op
                    .get::<Broadcast>()
                    .is_some_and(|b| self.apply_broadcast_op(b))
            }
            "reshape" | "squeeze" | "unsqueeze" | "flatten" => {
                let input = Shape::new(DType::F32, self.lens());
                match op.compute_shape(&[input], &[]) {
                    Ok(out) => match out.lens() {
                        Ok(lens) => self.apply_reshape(lens),
                        Err(_) => false,
                    },
                    Err(_) => false,
                }
            }
            _ => false,
        };
        applied && self.elements() == elements
    }

    /// Regroups sub-dimensions into `rdims`, splitting where a target is finer.
    pub fn apply_reshape(&mut self, rdims: &[usize]) -> bool {
        if rdims.iter().product::<usize>() != self.elements() || rdims.contains(&0) {
            return false;
        }
        let mut queue: std::collections::VecDeque<SubDimension> = self
            .dimensions
            .iter()
            .flat_map(|d| d.subdimensions.iter().cloned())
            .collect();
        if queue.iter().any(|s| s.len == 0) {
            return false;
        }
        let mut result: Vec<Dimension> = Vec::with_capacity(rdims.len());
        for &rdim in rdims {
            let mut dim = Dimension::default();
            if rdim == 1 {
                match queue.front() {
                    Some(front) if front.len == 1 => dim.subdimensions.extend(queue.pop_front()),
                    _ => dim.subdimensions.push(SubDimension::broadcast(1)),
                }
                result.push(dim);
                continue;
            }
            let mut rem = rdim;
            while rem > 1 {
                let Some(front) = queue.pop_front() else {
                    return false;
                };
                if rem % front.len == 0 {
                    rem /= front.len;
                    dim.subdimensions.push(front);
                    continue;
                }
                let g = gcd(front.len, rem);
                if g <= 1 {
                    return false;
                }
                let (head, tail) = front.split(g);
                dim.subdimensions.push(head);
                queue.push_front(tail);
                rem /= g;
            }
            result.push(dim);
        }
        if queue.iter().any(|s| s.len != 1) {
            return false;
        }
        if let Some(last) = result.last_mut() {
            last.subdimensions.extend(queue);
        }
        self.dimensions = result;
        true
    }

    pub fn apply_transpose(&mut self, permutation: &[usize]) -> bool {
        if permutation.len() != self.dimensions.len() || !is_permutation(permutation) {
            return false;
        }
        self.dimensions = permutation
            .iter()
            .map(|&p| self.dimensions[p].clone())
            .collect();
        true
    }

    fn apply_broadcast_op(&mut self, op: &Broadcast) -> bool {
        let rank = self.dimensions.len();
        if rank > op.out_lens.len() {
            return false;
        }
        let bound = (op.out_lens.len() - rank) as i64;
        let axis = if op.axis < 0 { op.axis + bound + 1 } else { op.axis };
        if axis < 0 || axis > bound {
            return false;
        }
        self.apply_broadcast(axis as usize, &op.out_lens)
    }

    pub fn apply_multibroadcast(&mut self, out_lens: &[usize]) -> bool {
        match out_lens.len().checked_sub(self.dimensions.len()) {
            Some(axis) => self.apply_broadcast(axis, out_lens),
            None => false,
        }
    }

    /// Places the current dimensions at `axis..` of `out_lens`; everything else is new.
    pub fn apply_broadcast(&mut self, axis: usize, out_lens: &[usize]) -> bool {
        let rank = self.dimensions.len();
        if axis + rank > out_lens.len() {
            return false;
        }
        let mut result = Vec::with_capacity(out_lens.len());
        for (i, &len) in out_lens.iter().enumerate() {
            if i < axis || i >= axis + rank {
                result.push(Dimension {
                    subdimensions: vec![SubDimension::broadcast(len)],
                });
                continue;
            }
            let dim = &self.dimensions[i - axis];
            if dim.len() == len {
                result.push(dim.clone());
            } else if dim.len() == 1 {
                let mut sub = SubDimension::broadcast(len);
                sub.hidden_axis = dim
                    .subdimensions
                    .iter()
                    .find(|s| !s.axis.is_empty())
                    .map(|s| s.axis.clone())
                    .or_else(|| {
                        dim.subdimensions
                            .iter()
                            .find_map(|s| s.hidden_axis.clone())
                    });
                result.push(Dimension {
                    subdimensions: vec![sub],
                });
            } else {
                return false;
            }
        }
        self.dimensions = result;
        true
    }

    /// Re-grounds the descriptor on new input extents, one per input axis.
    ///
    /// Per input axis the new extent may equal the old one, be 1 (every piece of
    /// the axis collapses), or differ only when a single sub-dimension carries the
    /// axis. Anything else is an invalid rebase. The result is simplified.
    pub fn rebase(&self, dims: &[usize]) -> Result<Self> {
        if dims.len() != self.rank() {
            return Err(Error::invalid_state(format!(
                "invalid rebase: {} extents for an input of rank {}",
                dims.len(),
                self.rank()
            )));
        }
        let mut pieces: Vec<Vec<(usize, usize)>> = vec![Vec::new(); self.rank()];
        for (d, dim) in self.dimensions.iter().enumerate() {
            for (s, sub) in dim.subdimensions.iter().enumerate() {
                if let Some(&axis) = sub.axis.first() {
                    pieces
                        .get_mut(axis)
                        .ok_or_else(|| {
                            Error::invalid_state(format!("invalid rebase: unknown axis {axis}"))
                        })?
                        .push((d, s));
                }
            }
        }

        let mut result = self.clone();
        for (axis, (subs, &new_len)) in pieces.iter().zip(dims).enumerate() {
            let old_len: usize = subs
                .iter()
                .map(|&(d, s)| result.dimensions[d].subdimensions[s].len)
                .product();
            match subs.as_slice() {
                [] if new_len == result.input_lens[axis] => {}
                [] => {
                    return Err(Error::invalid_state(format!(
                        "invalid rebase: axis {axis} no longer appears in the output"
                    )))
                }
                _ if new_len == old_len => {}
                _ if new_len == 1 => {
                    for &(d, s) in subs {
                        result.dimensions[d].subdimensions[s].len = 1;
                    }
                }
                [(d, s)] => result.dimensions[*d].subdimensions[*s].len = new_len,
                _ => {
                    return Err(Error::invalid_state(format!(
                        "invalid rebase: axis {axis} is split across {} sub-dimensions",
                        subs.len()
                    )))
                }
            }
            result.input_lens[axis] = new_len;
        }
        result.simplify();
        Ok(result)
    }
}

impl fmt::Display for SubDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = |axis: &[usize]| {
            axis.iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(".")
        };
        write!(f, "{}", self.len)?;
        if !self.axis.is_empty() {
            write!(f, ":{}", path(&self.axis))?;
        }
        if let Some(hidden) = &self.hidden_axis {
            write!(f, ":$bcast[{}]", path(hidden))?;
        }
        Ok(())
    }
}

impl fmt::Display for ShapeTransformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dimensions
            .iter()
            .map(|d| {
                let subs = d
                    .subdimensions
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("[{subs}]")
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{dims}}}")
    }
}
