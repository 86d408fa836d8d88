//! Graph IR for tensor programs.
//!
//! Shapes and host buffers live in [`shape`] and [`argument`]; operators in
//! [`ops`]; the instruction graph in [`ir`] and [`program`]; rewriting support in
//! [`matcher`], [`shape_transform`] and [`passes`]; targets in [`target`].

extern crate self as graphc;

pub mod argument;
mod env;
pub mod error;
pub mod ir;
pub mod matcher;
pub mod ops;
pub mod passes;
pub mod program;
pub mod shape;
pub mod shape_transform;
pub mod target;

pub use argument::Argument;
pub use error::{Error, Result};
pub use ir::{InstRef, Instruction, Module, ModuleId};
pub use ops::{Operation, Operator};
pub use program::{CompileOptions, ExecutionEnvironment, Program};
pub use shape::{DType, DynamicDimension, Shape};
pub use shape_transform::ShapeTransformDescriptor;
pub use target::{Context, Target};
