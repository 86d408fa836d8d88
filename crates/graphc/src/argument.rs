//! Host tensor buffers.
//!
//! An [`Argument`] is a typed storage vector viewed through a [`Shape`]. Movement
//! operators produce new views over the same storage by re-striding, so an argument
//! may be transposed or broadcast without owning a dense copy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shape::{DType, Shape};

/// Typed element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorData {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! visit_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            TensorData::Bool($values) => $body,
            TensorData::I8($values) => $body,
            TensorData::U8($values) => $body,
            TensorData::I32($values) => $body,
            TensorData::U32($values) => $body,
            TensorData::I64($values) => $body,
            TensorData::U64($values) => $body,
            TensorData::F32($values) => $body,
            TensorData::F64($values) => $body,
        }
    };
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I8(_) => DType::I8,
            TensorData::U8(_) => DType::U8,
            TensorData::I32(_) => DType::I32,
            TensorData::U32(_) => DType::U32,
            TensorData::I64(_) => DType::I64,
            TensorData::U64(_) => DType::U64,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        visit_data!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value_f64(&self, offset: usize) -> f64 {
        visit_data!(self, values => values[offset].to_f64())
    }

    /// Builds storage of `dtype` from widened values.
    pub fn from_f64(dtype: DType, values: &[f64]) -> Result<TensorData> {
        fn cast<T: Element>(values: &[f64]) -> Vec<T> {
            values.iter().map(|&v| T::from_f64(v)).collect()
        }
        Ok(match dtype {
            DType::Bool => TensorData::Bool(cast(values)),
            DType::I8 => TensorData::I8(cast(values)),
            DType::U8 => TensorData::U8(cast(values)),
            DType::I32 => TensorData::I32(cast(values)),
            DType::U32 => TensorData::U32(cast(values)),
            DType::I64 => TensorData::I64(cast(values)),
            DType::U64 => TensorData::U64(cast(values)),
            DType::F32 => TensorData::F32(cast(values)),
            DType::F64 => TensorData::F64(cast(values)),
            DType::Tuple => {
                return Err(Error::invalid_state("tuple shapes have no element storage"))
            }
        })
    }
}

/// Scalar element types that can back a [`TensorData`].
pub trait Element: Copy + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(values: Vec<Self>) -> TensorData;
    fn unwrap_slice(data: &TensorData) -> Option<&[Self]>;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_numeric_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            fn unwrap_slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_numeric_element!(i8, I8);
impl_numeric_element!(u8, U8);
impl_numeric_element!(i32, I32);
impl_numeric_element!(u32, U32);
impl_numeric_element!(i64, I64);
impl_numeric_element!(u64, U64);
impl_numeric_element!(f32, F32);
impl_numeric_element!(f64, F64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::Bool(values)
    }

    fn unwrap_slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::Bool(values) => Some(values),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

/// A host tensor: shared storage plus the shape used to view it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ArgumentRepr", into = "ArgumentRepr")]
pub struct Argument {
    shape: Shape,
    data: Arc<TensorData>,
}

impl Argument {
    /// Dense row-major tensor from `values`.
    pub fn from_vec<T: Element>(lens: impl Into<Vec<usize>>, values: Vec<T>) -> Result<Self> {
        let shape = Shape::new(T::DTYPE, lens);
        let elements = shape.elements()?;
        if elements != values.len() {
            return Err(Error::invalid_state(format!(
                "shape {shape} needs {elements} values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            shape,
            data: Arc::new(T::wrap(values)),
        })
    }

    /// Single element with lens `[1]` and strides `[0]`.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            shape: Shape::scalar_of(T::DTYPE),
            data: Arc::new(T::wrap(vec![value])),
        }
    }

    /// Dense tensor of `shape`'s lens from standard-order widened values.
    pub fn from_f64(shape: &Shape, values: &[f64]) -> Result<Self> {
        let standard = shape.as_standard()?;
        if standard.elements()? != values.len() {
            return Err(Error::invalid_state(format!(
                "shape {standard} needs {} values, got {}",
                standard.elements()?,
                values.len()
            )));
        }
        Ok(Self {
            data: Arc::new(TensorData::from_f64(shape.dtype(), values)?),
            shape: standard,
        })
    }

    /// Zero-filled storage covering `shape`'s element space.
    pub fn zeros(shape: &Shape) -> Result<Self> {
        let space = shape.element_space()?;
        Ok(Self {
            data: Arc::new(TensorData::from_f64(shape.dtype(), &vec![0.0; space])?),
            shape: shape.clone(),
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.shape.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Same storage viewed through `shape`.
    pub fn with_shape(&self, shape: Shape) -> Result<Self> {
        if shape.dtype() != self.data.dtype() {
            return Err(Error::invalid_state(format!(
                "cannot view {} storage as {}",
                self.data.dtype(),
                shape.dtype()
            )));
        }
        let space = shape.element_space()?;
        if space > self.data.len() {
            return Err(Error::invalid_state(format!(
                "view {shape} spans {space} elements, storage holds {}",
                self.data.len()
            )));
        }
        Ok(Self {
            shape,
            data: Arc::clone(&self.data),
        })
    }

    /// Element at standard-order position `linear`, widened.
    pub fn get(&self, linear: usize) -> Result<f64> {
        let elements = self.shape.elements()?;
        if linear >= elements {
            return Err(Error::invalid_state(format!(
                "index {linear} out of bounds for {elements} elements"
            )));
        }
        let offset = self.shape.index(&self.shape.multi(linear)?)?;
        Ok(self.data.value_f64(offset))
    }

    /// All elements in standard order, widened.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let elements = self.shape.elements()?;
        if self.shape.standard() {
            return Ok((0..elements).map(|i| self.data.value_f64(i)).collect());
        }
        (0..elements)
            .map(|i| {
                let offset = self.shape.index(&self.shape.multi(i)?)?;
                Ok(self.data.value_f64(offset))
            })
            .collect()
    }

    /// All elements in standard order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let storage = T::unwrap_slice(&self.data).ok_or_else(|| {
            Error::invalid_state(format!(
                "argument holds {}, requested {}",
                self.dtype(),
                T::DTYPE
            ))
        })?;
        let elements = self.shape.elements()?;
        (0..elements)
            .map(|i| Ok(storage[self.shape.index(&self.shape.multi(i)?)?]))
            .collect()
    }

    /// Dense copy in standard layout; returns `self` when it already is one.
    pub fn contiguous(&self) -> Result<Self> {
        if self.shape.standard() {
            return Ok(self.clone());
        }
        Argument::from_f64(&self.shape, &self.to_f64_vec()?)
    }

    /// Applies `f` elementwise, producing a dense tensor of `dtype`.
    pub fn map(&self, dtype: DType, f: impl Fn(f64) -> f64) -> Result<Self> {
        let values: Vec<f64> = self.to_f64_vec()?.into_iter().map(f).collect();
        Argument::from_f64(&self.shape.with_type(dtype), &values)
    }

    /// Combines two tensors of equal lens elementwise.
    pub fn zip_map(&self, other: &Argument, dtype: DType, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.shape.lens()? != other.shape.lens()? {
            return Err(Error::invalid_state(format!(
                "elementwise lens mismatch: {} vs {}",
                self.shape, other.shape
            )));
        }
        let lhs = self.to_f64_vec()?;
        let rhs = other.to_f64_vec()?;
        let values: Vec<f64> = lhs.iter().zip(rhs.iter()).map(|(&a, &b)| f(a, b)).collect();
        Argument::from_f64(&self.shape.with_type(dtype), &values)
    }
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        if self.dtype() != other.dtype() {
            return false;
        }
        match (self.shape.lens(), other.shape.lens()) {
            (Ok(a), Ok(b)) if a == b => {}
            _ => return false,
        }
        matches!((self.to_f64_vec(), other.to_f64_vec()), (Ok(a), Ok(b)) if a == b)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f64_vec() {
            Ok(values) => {
                let rendered = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{rendered}}}")
            }
            Err(_) => f.write_str("{?}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ArgumentRepr {
    shape: Shape,
    data: TensorData,
}

impl From<Argument> for ArgumentRepr {
    fn from(argument: Argument) -> Self {
        if argument.shape.standard() || argument.shape.scalar() {
            return ArgumentRepr {
                shape: argument.shape,
                data: (*argument.data).clone(),
            };
        }
        match argument.contiguous() {
            Ok(dense) => ArgumentRepr {
                shape: dense.shape,
                data: (*dense.data).clone(),
            },
            Err(_) => ArgumentRepr {
                shape: argument.shape,
                data: (*argument.data).clone(),
            },
        }
    }
}

impl TryFrom<ArgumentRepr> for Argument {
    type Error = Error;

    fn try_from(repr: ArgumentRepr) -> Result<Self> {
        let storage = Argument {
            shape: Shape::new(repr.data.dtype(), [repr.data.len()]),
            data: Arc::new(repr.data),
        };
        storage.with_shape(repr.shape)
    }
}
