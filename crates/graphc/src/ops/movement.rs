//! Layout operators. Transpose, broadcasts and (un)squeeze are pure views over the
//! input storage; reshape and flatten view a standard copy of their input.

use serde::{Deserialize, Serialize};

use super::{expect_inputs, normalize_axis, operator_common, Operation, Operator};
use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::ir::Module;
use crate::shape::{is_permutation, Shape};
use crate::target::Context;

fn static_input<'a>(op: &str, inputs: &'a [Shape]) -> Result<&'a Shape> {
    expect_inputs(op, inputs, 1)?;
    let input = &inputs[0];
    if input.is_tuple() || input.is_dynamic() {
        return Err(Error::shape(op, format!("requires a static input, got {input}")));
    }
    Ok(input)
}

fn view(op: &str, output: &Shape, args: &[Argument]) -> Result<Argument> {
    let input = args
        .first()
        .ok_or_else(|| Error::compute(op, "missing input"))?;
    input.with_shape(output.clone())
}

fn dense_view(op: &str, output: &Shape, args: &[Argument]) -> Result<Argument> {
    let input = args
        .first()
        .ok_or_else(|| Error::compute(op, "missing input"))?;
    input.contiguous()?.with_shape(output.clone())
}

fn normalize_axes(op: &str, axes: &[i64], rank: usize) -> Result<Vec<usize>> {
    let mut resolved = axes
        .iter()
        .map(|&axis| normalize_axis(op, axis, rank, false))
        .collect::<Result<Vec<_>>>()?;
    resolved.sort_unstable();
    if resolved.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::shape(op, format!("duplicate axes in {axes:?}")));
    }
    Ok(resolved)
}

/// `0` copies the input extent at the same position, `-1` is inferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reshape {
    pub dims: Vec<i64>,
}

impl Reshape {
    pub fn new(dims: impl IntoIterator<Item = usize>) -> Self {
        Self {
            dims: dims.into_iter().map(|d| d as i64).collect(),
        }
    }
}

impl Operator for Reshape {
    fn name(&self) -> &str {
        "reshape"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let elements = input.elements()?;
        let mut out = Vec::with_capacity(self.dims.len());
        let mut inferred = None;
        for (i, &dim) in self.dims.iter().enumerate() {
            match dim {
                0 => out.push(*lens.get(i).ok_or_else(|| {
                    Error::shape(self.name(), format!("dim 0 at {i} has no input extent"))
                })?),
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    out.push(1);
                }
                d if d > 0 => out.push(d as usize),
                d => return Err(Error::shape(self.name(), format!("invalid dim {d}"))),
            }
        }
        let known: usize = out.iter().product();
        if let Some(i) = inferred {
            if known == 0 || elements % known != 0 {
                return Err(Error::shape(
                    self.name(),
                    format!("cannot infer dim for {elements} elements from {:?}", self.dims),
                ));
            }
            out[i] = elements / known;
        }
        if out.iter().product::<usize>() != elements {
            return Err(Error::shape(
                self.name(),
                format!("cannot reshape {lens:?} to {out:?}"),
            ));
        }
        Ok(Shape::new(input.dtype(), out))
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        dense_view(self.name(), output, args)
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transpose {
    pub permutation: Vec<usize>,
}

impl Transpose {
    pub fn new(permutation: impl Into<Vec<usize>>) -> Self {
        Self {
            permutation: permutation.into(),
        }
    }
}

impl Operator for Transpose {
    fn name(&self) -> &str {
        "transpose"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        if self.permutation.len() != lens.len() || !is_permutation(&self.permutation) {
            return Err(Error::shape(
                self.name(),
                format!("{:?} is not a permutation of rank {}", self.permutation, lens.len()),
            ));
        }
        let strides = input.strides()?;
        Shape::with_strides(
            input.dtype(),
            self.permutation.iter().map(|&p| lens[p]).collect::<Vec<_>>(),
            self.permutation.iter().map(|&p| strides[p]).collect::<Vec<_>>(),
        )
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        view(self.name(), output, args)
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

/// Places the input axes at `axis..axis+rank` of `out_lens`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub axis: i64,
    pub out_lens: Vec<usize>,
}

impl Broadcast {
    fn resolved_axis(&self, rank: usize) -> Result<usize> {
        if rank > self.out_lens.len() {
            return Err(Error::shape(
                self.name(),
                format!("input rank {rank} exceeds output rank {}", self.out_lens.len()),
            ));
        }
        normalize_axis(self.name(), self.axis, self.out_lens.len() - rank, true)
    }
}

impl Operator for Broadcast {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let strides = input.strides()?;
        let axis = self.resolved_axis(lens.len())?;
        let mut out_strides = vec![0usize; self.out_lens.len()];
        for (i, (&len, &stride)) in lens.iter().zip(strides.iter()).enumerate() {
            let target = self.out_lens[axis + i];
            if len == target {
                out_strides[axis + i] = if len == 1 { 0 } else { stride };
            } else if len != 1 {
                return Err(Error::shape(
                    self.name(),
                    format!("cannot broadcast {lens:?} to {:?} at axis {axis}", self.out_lens),
                ));
            }
        }
        Shape::with_strides(input.dtype(), self.out_lens.clone(), out_strides)
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        view(self.name(), output, args)
    }

    fn normalize(&self, inputs: &[Shape]) -> Result<Option<Operation>> {
        if self.axis >= 0 {
            return Ok(None);
        }
        let input = static_input(self.name(), inputs)?;
        let axis = self.resolved_axis(input.ndim())?;
        Ok(Some(Operation::new(Broadcast {
            axis: axis as i64,
            out_lens: self.out_lens.clone(),
        })))
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

/// Numpy-style broadcast, aligning input axes to the right of `out_lens`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiBroadcast {
    pub out_lens: Vec<usize>,
}

impl MultiBroadcast {
    pub fn new(out_lens: impl Into<Vec<usize>>) -> Self {
        Self {
            out_lens: out_lens.into(),
        }
    }
}

impl Operator for MultiBroadcast {
    fn name(&self) -> &str {
        "multibroadcast"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let strides = input.strides()?;
        if lens.len() > self.out_lens.len() {
            return Err(Error::shape(
                self.name(),
                format!("cannot broadcast {lens:?} to lower rank {:?}", self.out_lens),
            ));
        }
        let offset = self.out_lens.len() - lens.len();
        let mut out_strides = vec![0usize; self.out_lens.len()];
        for (i, (&len, &stride)) in lens.iter().zip(strides.iter()).enumerate() {
            let target = self.out_lens[offset + i];
            if len == target {
                out_strides[offset + i] = if len == 1 { 0 } else { stride };
            } else if len != 1 {
                return Err(Error::shape(
                    self.name(),
                    format!("cannot broadcast {lens:?} to {:?}", self.out_lens),
                ));
            }
        }
        Shape::with_strides(input.dtype(), self.out_lens.clone(), out_strides)
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        view(self.name(), output, args)
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

/// Removes size-1 axes (all of them when `axes` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Squeeze {
    pub axes: Vec<i64>,
}

impl Squeeze {
    pub fn new(axes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            axes: axes.into_iter().map(|a| a as i64).collect(),
        }
    }
}

impl Operator for Squeeze {
    fn name(&self) -> &str {
        "squeeze"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let strides = input.strides()?;
        let axes = if self.axes.is_empty() {
            (0..lens.len()).filter(|&i| lens[i] == 1).collect()
        } else {
            normalize_axes(self.name(), &self.axes, lens.len())?
        };
        if let Some(&axis) = axes.iter().find(|&&axis| lens[axis] != 1) {
            return Err(Error::shape(
                self.name(),
                format!("axis {axis} of {lens:?} is not 1"),
            ));
        }
        let (out_lens, out_strides): (Vec<usize>, Vec<usize>) = (0..lens.len())
            .filter(|i| !axes.contains(i))
            .map(|i| (lens[i], strides[i]))
            .unzip();
        if out_lens.is_empty() {
            return Ok(Shape::scalar_of(input.dtype()));
        }
        Shape::with_strides(input.dtype(), out_lens, out_strides)
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        view(self.name(), output, args)
    }

    fn normalize(&self, inputs: &[Shape]) -> Result<Option<Operation>> {
        let input = static_input(self.name(), inputs)?;
        let axes = normalize_axes(self.name(), &self.axes, input.ndim())?;
        let axes: Vec<i64> = axes.into_iter().map(|a| a as i64).collect();
        if axes == self.axes {
            return Ok(None);
        }
        Ok(Some(Operation::new(Squeeze { axes })))
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

/// Inserts size-1 axes; `axes` index the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsqueeze {
    pub axes: Vec<i64>,
}

impl Unsqueeze {
    pub fn new(axes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            axes: axes.into_iter().map(|a| a as i64).collect(),
        }
    }
}

impl Operator for Unsqueeze {
    fn name(&self) -> &str {
        "unsqueeze"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let strides = input.strides()?;
        let rank = lens.len() + self.axes.len();
        let axes = normalize_axes(self.name(), &self.axes, rank)?;
        let mut out_lens = Vec::with_capacity(rank);
        let mut out_strides = Vec::with_capacity(rank);
        let mut src = 0usize;
        for i in 0..rank {
            if axes.contains(&i) {
                out_lens.push(1);
                out_strides.push(0);
            } else {
                out_lens.push(lens[src]);
                out_strides.push(strides[src]);
                src += 1;
            }
        }
        // Inserted axes take the stride of the next real axis scaled by its extent.
        let mut next_stride = 1usize;
        for i in (0..rank).rev() {
            if axes.contains(&i) {
                out_strides[i] = next_stride;
            } else {
                next_stride = out_strides[i] * out_lens[i].max(1);
            }
        }
        Shape::with_strides(input.dtype(), out_lens, out_strides)
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        view(self.name(), output, args)
    }

    fn normalize(&self, inputs: &[Shape]) -> Result<Option<Operation>> {
        let input = static_input(self.name(), inputs)?;
        let rank = input.ndim() + self.axes.len();
        let axes = normalize_axes(self.name(), &self.axes, rank)?;
        let axes: Vec<i64> = axes.into_iter().map(|a| a as i64).collect();
        if axes == self.axes {
            return Ok(None);
        }
        Ok(Some(Operation::new(Unsqueeze { axes })))
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}

/// Collapses to 2-D: `[prod(lens[..axis]), prod(lens[axis..])]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flatten {
    pub axis: i64,
}

impl Operator for Flatten {
    fn name(&self) -> &str {
        "flatten"
    }

    fn compute_shape(&self, inputs: &[Shape], _modules: &[&Module]) -> Result<Shape> {
        let input = static_input(self.name(), inputs)?;
        let lens = input.lens()?;
        let axis = normalize_axis(self.name(), self.axis, lens.len(), true)?;
        let outer: usize = lens[..axis].iter().product();
        let inner: usize = lens[axis..].iter().product();
        Ok(Shape::new(input.dtype(), vec![outer, inner]))
    }

    fn compute(&self, _ctx: &mut dyn Context, output: &Shape, args: &[Argument]) -> Result<Argument> {
        dense_view(self.name(), output, args)
    }

    fn normalize(&self, inputs: &[Shape]) -> Result<Option<Operation>> {
        if self.axis >= 0 {
            return Ok(None);
        }
        let input = static_input(self.name(), inputs)?;
        let axis = normalize_axis(self.name(), self.axis, input.ndim(), true)?;
        Ok(Some(Operation::new(Flatten { axis: axis as i64 })))
    }

    fn is_movement(&self) -> bool {
        true
    }

    operator_common!();
}
