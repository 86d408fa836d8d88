//! Versioned JSON form of a [`Program`].
//!
//! The document carries an integer file-format version that must match
//! [`FILE_FORMAT_VERSION`] exactly, plus the crate version that wrote it. A
//! differing crate version only produces a warning.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{Program, MAIN_MODULE};
use crate::argument::Argument;
use crate::error::Error;
use crate::ir::{InstRef, Module, ModuleId};
use crate::ops::{has_op, make_op, Outline, Param, Return};
use crate::shape::Shape;
use crate::target::make_target;

pub const FILE_FORMAT_VERSION: u64 = 1;
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised while reading or writing a serialized program.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file format version {found} does not match expected {expected}")]
    FormatVersion { found: u64, expected: u64 },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("malformed program: {0}")]
    Malformed(String),
    #[error(transparent)]
    Graph(#[from] Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgramFile {
    version: u64,
    software_version: String,
    targets: Vec<String>,
    contexts: Vec<Value>,
    modules: BTreeMap<String, Vec<NodeRecord>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    output: String,
    name: String,
    shape: Shape,
    normalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    literal: Option<Argument>,
    operator: Value,
    inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    module_inputs: Vec<String>,
    #[serde(default)]
    target: usize,
}

fn output_names(module: &Module) -> HashMap<InstRef, String> {
    module
        .iter()
        .enumerate()
        .map(|(position, ins)| {
            let name = match module[ins].op().get::<Param>() {
                Some(param) => param.parameter.clone(),
                None => format!("@{position}"),
            };
            (ins, name)
        })
        .collect()
}

fn module_records(program: &Program, module: &Module) -> Result<Vec<NodeRecord>, LoadError> {
    let names = output_names(module);
    module
        .iter()
        .map(|ins| {
            let inst = &module[ins];
            let module_inputs = inst
                .module_inputs()
                .iter()
                .map(|&id| program.module(id).map(|m| m.name().to_string()))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(NodeRecord {
                output: names[&ins].clone(),
                name: inst.name().to_string(),
                shape: inst.shape().clone(),
                normalized: inst.normalized(),
                literal: inst.literal().cloned(),
                operator: inst.op().attributes(),
                inputs: inst.inputs().iter().map(|input| names[input].clone()).collect(),
                module_inputs,
                target: inst.target(),
            })
        })
        .collect()
}

/// Module names ordered so every module comes after the modules it invokes.
fn load_order(modules: &BTreeMap<String, Vec<NodeRecord>>) -> Result<Vec<&str>, LoadError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    fn visit<'a>(
        name: &'a str,
        modules: &'a BTreeMap<String, Vec<NodeRecord>>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<&'a str>,
    ) -> Result<(), LoadError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(LoadError::Malformed(format!("module `{name}` invokes itself")))
            }
            None => {}
        }
        let (key, records) = modules
            .get_key_value(name)
            .ok_or_else(|| LoadError::Malformed(format!("unknown module `{name}`")))?;
        marks.insert(key.as_str(), Mark::Visiting);
        for sub in records.iter().flat_map(|r| r.module_inputs.iter()) {
            visit(sub, modules, marks, order)?;
        }
        marks.insert(key.as_str(), Mark::Done);
        order.push(key.as_str());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(modules.len());
    for name in modules.keys() {
        visit(name, modules, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn load_module(program: &mut Program, id: ModuleId, records: &[NodeRecord]) -> Result<(), LoadError> {
    let mut names: HashMap<&str, InstRef> = HashMap::new();
    for record in records {
        let inputs = record
            .inputs
            .iter()
            .map(|name| {
                names.get(name.as_str()).copied().ok_or_else(|| {
                    LoadError::Malformed(format!("`{}` uses undefined `{name}`", record.output))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let modules = record
            .module_inputs
            .iter()
            .map(|name| {
                program
                    .get_module(name)
                    .ok_or_else(|| LoadError::Malformed(format!("unknown module `{name}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !has_op(&record.name) {
            return Err(LoadError::UnknownOperator(record.name.clone()));
        }
        let op = make_op(&record.name, &record.operator)?;

        let ins = if let Some(literal) = &record.literal {
            program.module_mut(id)?.add_literal(literal.clone())
        } else if let Some(param) = op.get::<Param>() {
            program
                .module_mut(id)?
                .add_parameter(param.parameter.clone(), param.shape.clone())?
        } else if op.is::<Outline>() {
            program.module_mut(id)?.add_outline(record.shape.clone())
        } else if op.is::<Return>() {
            program.module_mut(id)?.add_return(&inputs)?
        } else if modules.is_empty() {
            program.module_mut(id)?.add_instruction(op, &inputs)?
        } else {
            program.add_instruction_with_modules(id, op, &inputs, &modules)?
        };

        let module = program.module_mut(id)?;
        let inferred = module.get(ins)?.shape();
        if *inferred != record.shape {
            return Err(LoadError::Malformed(format!(
                "`{}` is recorded as {} but infers {inferred}",
                record.output, record.shape
            )));
        }
        module.set_normalized(ins, record.normalized)?;
        module.set_target(ins, record.target)?;
        if names.insert(record.output.as_str(), ins).is_some() {
            return Err(LoadError::Malformed(format!(
                "`{}` is defined twice",
                record.output
            )));
        }
    }
    Ok(())
}

impl Program {
    pub fn to_json_string(&self) -> Result<String, LoadError> {
        let modules = self
            .modules
            .iter()
            .map(|module| Ok((module.name().to_string(), module_records(self, module)?)))
            .collect::<Result<BTreeMap<_, _>, LoadError>>()?;
        let file = ProgramFile {
            version: FILE_FORMAT_VERSION,
            software_version: SOFTWARE_VERSION.to_string(),
            targets: self.targets.iter().map(|t| t.name().to_string()).collect(),
            contexts: self.contexts.iter().map(|ctx| ctx.to_value()).collect(),
            modules,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Rebuilds a program, re-running shape inference on every node.
    pub fn from_json_str(src: &str) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_str(src)?;
        let found = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| LoadError::Malformed("missing `version`".into()))?;
        if found != FILE_FORMAT_VERSION {
            return Err(LoadError::FormatVersion {
                found,
                expected: FILE_FORMAT_VERSION,
            });
        }
        let file: ProgramFile = serde_json::from_value(value)?;
        if file.software_version != SOFTWARE_VERSION {
            tracing::warn!(
                found = %file.software_version,
                expected = SOFTWARE_VERSION,
                "program was written by a different graphc version"
            );
        }
        if !file.modules.contains_key(MAIN_MODULE) {
            return Err(LoadError::Malformed("no `main` module".into()));
        }

        let mut program = Program::new();
        for name in file.modules.keys().filter(|name| name.as_str() != MAIN_MODULE) {
            program.create_module(name.clone())?;
        }
        for name in load_order(&file.modules)? {
            let id = program
                .get_module(name)
                .ok_or_else(|| LoadError::Malformed(format!("unknown module `{name}`")))?;
            load_module(&mut program, id, &file.modules[name])?;
        }

        if !file.targets.is_empty() {
            if file.contexts.len() != file.targets.len() {
                return Err(LoadError::Malformed(format!(
                    "{} target(s) but {} context(s)",
                    file.targets.len(),
                    file.contexts.len()
                )));
            }
            for (name, state) in file.targets.iter().zip(&file.contexts) {
                let target =
                    make_target(name).ok_or_else(|| LoadError::UnknownTarget(name.clone()))?;
                let mut ctx = target.get_context();
                ctx.from_value(state)?;
                program.targets.push(target);
                program.contexts.push(ctx);
            }
            program.finalize()?;
        }
        Ok(program)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let contents = fs::read_to_string(path)?;
        Program::from_json_str(&contents)
    }
}
