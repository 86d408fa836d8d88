//! Tensor type and layout descriptors.
//!
//! A [`Shape`] is one of three mutually exclusive forms:
//!
//! - static: per-axis `lens` plus per-axis `strides` (in elements),
//! - dynamic: per-axis `(min, max, optimals)` ranges,
//! - tuple: a list of sub-shapes.
//!
//! Shapes are plain values. Every transformation (`with_lens`, `to_static`,
//! `to_dynamic`, ...) returns a new shape; the derived `standard` flag is computed
//! once at construction and never drifts from the lens/strides it describes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element types supported by the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    I8,
    U8,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Marker type carried by tuple shapes.
    Tuple,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I32 => "int32",
            DType::U32 => "uint32",
            DType::I64 => "int64",
            DType::U64 => "uint64",
            DType::F32 => "float",
            DType::F64 => "double",
            DType::Tuple => "tuple",
        }
    }

    /// Storage size of a single element. Tuples have no element storage.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
            DType::Tuple => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::U8 | DType::I32 | DType::U32 | DType::I64 | DType::U64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I32 | DType::I64 | DType::F32 | DType::F64
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Range of admissible extents for one dynamic axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicDimension {
    pub min: usize,
    pub max: usize,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub optimals: BTreeSet<usize>,
}

impl DynamicDimension {
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            optimals: BTreeSet::new(),
        }
    }

    pub fn fixed(len: usize) -> Self {
        Self::new(len, len)
    }

    pub fn with_optimals(mut self, optimals: impl IntoIterator<Item = usize>) -> Self {
        self.optimals = optimals.into_iter().collect();
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, len: usize) -> bool {
        self.min <= len && len <= self.max
    }
}

impl fmt::Display for DynamicDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optimals.is_empty() {
            write!(f, "[{}, {}]", self.min, self.max)
        } else {
            let optimals = self
                .optimals
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "[{}, {}, {{{}}}]", self.min, self.max, optimals)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Layout {
    Static {
        lens: Vec<usize>,
        strides: Vec<usize>,
        standard: bool,
    },
    Dynamic {
        dims: Vec<DynamicDimension>,
    },
    Tuple {
        shapes: Vec<Shape>,
    },
}

/// Element type plus layout of a tensor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ShapeRepr", into = "ShapeRepr")]
pub struct Shape {
    dtype: DType,
    layout: Layout,
}

/// Row-major strides for `lens`.
pub fn standard_strides(lens: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; lens.len()];
    let mut stride = 1usize;
    for axis in (0..lens.len()).rev() {
        strides[axis] = stride;
        stride *= lens[axis].max(1);
    }
    strides
}

/// Inverse of a permutation.
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inverse[p] = i;
    }
    inverse
}

/// `result[i] = dims[perm[i]]`.
pub fn reorder_dims<T: Clone>(dims: &[T], perm: &[usize]) -> Vec<T> {
    perm.iter().map(|&p| dims[p].clone()).collect()
}

pub fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &p in perm {
        if p >= perm.len() || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

fn compute_standard(lens: &[usize], strides: &[usize]) -> bool {
    if !is_packed(lens, strides) {
        return false;
    }
    let expected = standard_strides(lens);
    lens.iter()
        .zip(strides.iter().zip(expected.iter()))
        .all(|(&len, (&stride, &want))| len == 1 || stride == want)
}

fn is_broadcasted(lens: &[usize], strides: &[usize]) -> bool {
    lens.iter()
        .zip(strides.iter())
        .any(|(&len, &stride)| len > 1 && stride == 0)
}

fn element_space_of(lens: &[usize], strides: &[usize]) -> usize {
    if lens.iter().any(|&len| len == 0) {
        return 0;
    }
    lens.iter()
        .zip(strides.iter())
        .map(|(&len, &stride)| (len - 1) * stride)
        .sum::<usize>()
        + 1
}

fn is_packed(lens: &[usize], strides: &[usize]) -> bool {
    !is_broadcasted(lens, strides)
        && lens.iter().product::<usize>() == element_space_of(lens, strides)
}

impl Shape {
    /// Standard (packed, row-major) shape.
    pub fn new(dtype: DType, lens: impl Into<Vec<usize>>) -> Self {
        let lens = lens.into();
        let strides = standard_strides(&lens);
        Self::from_parts(dtype, lens, strides)
    }

    /// Shape with explicit strides. Fails when the two lists differ in length.
    pub fn with_strides(
        dtype: DType,
        lens: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> Result<Self> {
        let lens = lens.into();
        let strides = strides.into();
        if lens.len() != strides.len() {
            return Err(Error::invalid_state(format!(
                "lens {lens:?} and strides {strides:?} differ in rank"
            )));
        }
        Ok(Self::from_parts(dtype, lens, strides))
    }

    /// Single element broadcast to nothing: lens `[1]`, strides `[0]`.
    pub fn scalar_of(dtype: DType) -> Self {
        Self::from_parts(dtype, vec![1], vec![0])
    }

    pub fn dynamic(dtype: DType, dims: impl Into<Vec<DynamicDimension>>) -> Self {
        Self {
            dtype,
            layout: Layout::Dynamic { dims: dims.into() },
        }
    }

    pub fn tuple(shapes: impl Into<Vec<Shape>>) -> Self {
        Self {
            dtype: DType::Tuple,
            layout: Layout::Tuple {
                shapes: shapes.into(),
            },
        }
    }

    /// Packed shape whose memory order is `perm` (axis `perm[0]` is outermost).
    pub fn from_permutation(dtype: DType, lens: &[usize], perm: &[usize]) -> Self {
        let memory_lens = reorder_dims(lens, perm);
        let memory_strides = standard_strides(&memory_lens);
        let inverse = invert_permutation(perm);
        Self::from_parts(
            dtype,
            lens.to_vec(),
            reorder_dims(&memory_strides, &inverse),
        )
    }

    fn from_parts(dtype: DType, lens: Vec<usize>, strides: Vec<usize>) -> Self {
        let standard = compute_standard(&lens, &strides);
        Self {
            dtype,
            layout: Layout::Static {
                lens,
                strides,
                standard,
            },
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_dynamic(&self) -> bool {
        match &self.layout {
            Layout::Dynamic { .. } => true,
            Layout::Tuple { shapes } => shapes.iter().any(Shape::is_dynamic),
            Layout::Static { .. } => false,
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.layout, Layout::Tuple { .. })
    }

    pub fn ndim(&self) -> usize {
        match &self.layout {
            Layout::Static { lens, .. } => lens.len(),
            Layout::Dynamic { dims } => dims.len(),
            Layout::Tuple { .. } => 0,
        }
    }

    pub fn lens(&self) -> Result<&[usize]> {
        match &self.layout {
            Layout::Static { lens, .. } => Ok(lens),
            Layout::Dynamic { .. } => Err(Error::invalid_state(
                "lens() called on a dynamic shape",
            )),
            Layout::Tuple { .. } => Err(Error::invalid_state("lens() called on a tuple shape")),
        }
    }

    pub fn strides(&self) -> Result<&[usize]> {
        match &self.layout {
            Layout::Static { strides, .. } => Ok(strides),
            Layout::Dynamic { .. } => Err(Error::invalid_state(
                "strides() called on a dynamic shape",
            )),
            Layout::Tuple { .. } => Err(Error::invalid_state(
                "strides() called on a tuple shape",
            )),
        }
    }

    pub fn elements(&self) -> Result<usize> {
        Ok(self.lens()?.iter().product())
    }

    /// Number of storage slots spanned by the strides.
    pub fn element_space(&self) -> Result<usize> {
        Ok(element_space_of(self.lens()?, self.strides()?))
    }

    pub fn bytes(&self) -> Result<usize> {
        match &self.layout {
            Layout::Tuple { shapes } => shapes.iter().map(Shape::bytes).sum(),
            _ => Ok(self.element_space()? * self.dtype.size_in_bytes()),
        }
    }

    pub fn sub_shapes(&self) -> &[Shape] {
        match &self.layout {
            Layout::Tuple { shapes } => shapes,
            _ => &[],
        }
    }

    /// Packed and row-major on every axis whose extent is not 1.
    pub fn standard(&self) -> bool {
        matches!(self.layout, Layout::Static { standard: true, .. })
    }

    pub fn packed(&self) -> bool {
        match &self.layout {
            Layout::Static { lens, strides, .. } => is_packed(lens, strides),
            _ => false,
        }
    }

    pub fn broadcasted(&self) -> bool {
        match &self.layout {
            Layout::Static { lens, strides, .. } => is_broadcasted(lens, strides),
            _ => false,
        }
    }

    /// Strides of the non-degenerate, non-broadcast axes are not in descending order.
    pub fn transposed(&self) -> bool {
        match &self.layout {
            Layout::Static { lens, strides, .. } => {
                let relevant: Vec<usize> = lens
                    .iter()
                    .zip(strides.iter())
                    .filter(|(&len, &stride)| len != 1 && stride != 0)
                    .map(|(_, &stride)| stride)
                    .collect();
                relevant.windows(2).any(|w| w[0] < w[1])
            }
            _ => false,
        }
    }

    /// Every stride is zero, so all elements alias one value.
    pub fn scalar(&self) -> bool {
        match &self.layout {
            Layout::Static { strides, .. } => strides.iter().all(|&s| s == 0),
            _ => false,
        }
    }

    /// Per-axis ranges. Static shapes report fixed ranges.
    pub fn dyn_dims(&self) -> Vec<DynamicDimension> {
        match &self.layout {
            Layout::Static { lens, .. } => lens.iter().map(|&l| DynamicDimension::fixed(l)).collect(),
            Layout::Dynamic { dims } => dims.clone(),
            Layout::Tuple { .. } => Vec::new(),
        }
    }

    pub fn min_lens(&self) -> Vec<usize> {
        self.dyn_dims().iter().map(|d| d.min).collect()
    }

    pub fn max_lens(&self) -> Vec<usize> {
        self.dyn_dims().iter().map(|d| d.max).collect()
    }

    /// Smallest optimal value per axis, falling back to the axis maximum.
    pub fn opt_lens(&self) -> Vec<usize> {
        self.dyn_dims()
            .iter()
            .map(|d| d.optimals.iter().next().copied().unwrap_or(d.max))
            .collect()
    }

    /// Fixes every non-fixed dynamic axis to `default_len`.
    pub fn to_static(&self, default_len: usize) -> Shape {
        match &self.layout {
            Layout::Static { .. } => self.clone(),
            Layout::Dynamic { dims } => {
                let lens: Vec<usize> = dims
                    .iter()
                    .map(|d| if d.is_fixed() { d.min } else { default_len })
                    .collect();
                Shape::new(self.dtype, lens)
            }
            Layout::Tuple { shapes } => {
                Shape::tuple(shapes.iter().map(|s| s.to_static(default_len)).collect::<Vec<_>>())
            }
        }
    }

    pub fn to_dynamic(&self) -> Shape {
        match &self.layout {
            Layout::Static { .. } => Shape::dynamic(self.dtype, self.dyn_dims()),
            Layout::Dynamic { .. } => self.clone(),
            Layout::Tuple { shapes } => {
                Shape::tuple(shapes.iter().map(Shape::to_dynamic).collect::<Vec<_>>())
            }
        }
    }

    /// Same element type, standard strides.
    pub fn as_standard(&self) -> Result<Shape> {
        Ok(Shape::new(self.dtype, self.lens()?.to_vec()))
    }

    /// Canonical strides for a standard shape whose size-1 axes carry arbitrary strides.
    pub fn normalize_standard(&self) -> Shape {
        match &self.layout {
            Layout::Static {
                lens,
                standard: true,
                ..
            } => Shape::new(self.dtype, lens.clone()),
            _ => self.clone(),
        }
    }

    pub fn with_type(&self, dtype: DType) -> Shape {
        Shape {
            dtype,
            layout: self.layout.clone(),
        }
    }

    /// New extents, same memory axis order as `self`.
    pub fn with_lens(&self, lens: &[usize]) -> Result<Shape> {
        let current = self.lens()?;
        if current.len() != lens.len() {
            return Err(Error::invalid_state(format!(
                "with_lens rank mismatch: {} vs {}",
                current.len(),
                lens.len()
            )));
        }
        let perm = find_permutation(self)?;
        Ok(Shape::from_permutation(self.dtype, lens, &perm))
    }

    /// Storage offset of a multi-index.
    pub fn index(&self, multi: &[usize]) -> Result<usize> {
        let strides = self.strides()?;
        Ok(multi.iter().zip(strides.iter()).map(|(i, s)| i * s).sum())
    }

    /// Multi-index of the `linear`-th element in row-major order.
    pub fn multi(&self, linear: usize) -> Result<Vec<usize>> {
        let lens = self.lens()?;
        let mut result = vec![0usize; lens.len()];
        let mut rem = linear;
        for axis in (0..lens.len()).rev() {
            let len = lens[axis].max(1);
            result[axis] = rem % len;
            rem /= len;
        }
        Ok(result)
    }
}

/// Axis order from outermost to innermost in memory (stable on ties).
pub fn find_permutation(shape: &Shape) -> Result<Vec<usize>> {
    let lens = shape.lens()?;
    let strides = shape.strides()?;
    let mut perm: Vec<usize> = (0..lens.len()).collect();
    perm.sort_by(|&a, &b| (strides[b], lens[b]).cmp(&(strides[a], lens[a])));
    Ok(perm)
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layout {
            Layout::Static { lens, strides, .. } => {
                write!(f, "{}, {{{}}}, {{{}}}", self.dtype, join(lens), join(strides))
            }
            Layout::Dynamic { dims } => write!(f, "{}, {{{}}}", self.dtype, join(dims)),
            Layout::Tuple { shapes } => {
                let inner = shapes
                    .iter()
                    .map(|s| format!("[{s}]"))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "tuple<{inner}>")
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ShapeRepr {
    #[serde(rename = "type")]
    dtype: DType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    lens: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    strides: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dynamic_dimensions: Vec<DynamicDimension>,
    /// Set for dynamic shapes; a rank-0 dynamic shape has no dimensions to show it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    dynamic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sub_shapes: Vec<Shape>,
}

impl From<Shape> for ShapeRepr {
    fn from(shape: Shape) -> Self {
        let dtype = shape.dtype;
        let mut repr = ShapeRepr {
            dtype,
            lens: Vec::new(),
            strides: Vec::new(),
            dynamic_dimensions: Vec::new(),
            dynamic: false,
            sub_shapes: Vec::new(),
        };
        match shape.layout {
            Layout::Static { lens, strides, .. } => {
                repr.lens = lens;
                repr.strides = strides;
            }
            Layout::Dynamic { dims } => {
                repr.dynamic_dimensions = dims;
                repr.dynamic = true;
            }
            Layout::Tuple { shapes } => repr.sub_shapes = shapes,
        }
        repr
    }
}

impl TryFrom<ShapeRepr> for Shape {
    type Error = Error;

    fn try_from(repr: ShapeRepr) -> Result<Self> {
        if repr.dtype == DType::Tuple {
            return Ok(Shape::tuple(repr.sub_shapes));
        }
        if repr.dynamic || !repr.dynamic_dimensions.is_empty() {
            if !repr.lens.is_empty() || !repr.strides.is_empty() {
                return Err(Error::invalid_state(
                    "shape has both static lens and dynamic dimensions",
                ));
            }
            return Ok(Shape::dynamic(repr.dtype, repr.dynamic_dimensions));
        }
        Shape::with_strides(repr.dtype, repr.lens, repr.strides)
    }
}
