use std::collections::HashMap;

use graphc::ops::{Add, If, Mul, Neg, Operation, Relu, Transpose};
use graphc::program::{LoadError, FILE_FORMAT_VERSION};
use graphc::{Argument, DType, Program, Shape};
use serde_json::Value;

fn f32s(lens: &[usize]) -> Shape {
    Shape::new(DType::F32, lens.to_vec())
}

fn sample_program() -> anyhow::Result<Program> {
    let mut program = Program::new();
    let main = program.main_module_mut();
    let scale = main.add_literal(Argument::from_vec([3, 2], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])?);
    let x = main.add_parameter("x", f32s(&[2, 3]))?;
    let t = main.add_instruction(Operation::new(Transpose::new(vec![1, 0])), &[x])?;
    let scaled = main.add_instruction(Operation::new(Mul {}), &[t, scale])?;
    let out = main.add_instruction(Operation::new(Relu {}), &[scaled])?;
    main.add_return(&[out])?;
    Ok(program)
}

fn x_binding() -> anyhow::Result<HashMap<String, Argument>> {
    let x = Argument::from_vec([2, 3], vec![1.0f32, -1.0, 2.0, -2.0, 3.0, -3.0])?;
    Ok(HashMap::from([("x".to_string(), x)]))
}

#[test]
fn round_trip_preserves_results() -> anyhow::Result<()> {
    let mut program = sample_program()?;
    let expected = program.eval(&x_binding()?)?;

    let json = program.to_json_string()?;
    let mut loaded = Program::from_json_str(&json)?;
    assert_eq!(loaded.eval(&x_binding()?)?, expected);
    assert_eq!(loaded.main_module().len(), program.main_module().len());
    assert_eq!(loaded.main_module().validate(), None);
    Ok(())
}

#[test]
fn document_carries_both_versions() -> anyhow::Result<()> {
    let json = sample_program()?.to_json_string()?;
    let value: Value = serde_json::from_str(&json)?;
    assert_eq!(value["version"], Value::from(FILE_FORMAT_VERSION));
    assert_eq!(value["software_version"], Value::from(graphc::program::SOFTWARE_VERSION));
    assert!(value["modules"]["main"].is_array());
    Ok(())
}

#[test]
fn other_format_versions_are_rejected() -> anyhow::Result<()> {
    let json = sample_program()?.to_json_string()?;
    let mut value: Value = serde_json::from_str(&json)?;
    value["version"] = Value::from(99u64);
    let err = Program::from_json_str(&value.to_string()).unwrap_err();
    assert!(
        matches!(err, LoadError::FormatVersion { found: 99, expected } if expected == FILE_FORMAT_VERSION),
        "{err}"
    );
    Ok(())
}

#[test]
fn other_software_versions_still_load() -> anyhow::Result<()> {
    let json = sample_program()?.to_json_string()?;
    let mut value: Value = serde_json::from_str(&json)?;
    value["software_version"] = Value::from("0.0.1-old");
    let mut loaded = Program::from_json_str(&value.to_string())?;
    assert_eq!(loaded.eval(&x_binding()?)?, sample_program()?.eval(&x_binding()?)?);
    Ok(())
}

#[test]
fn unknown_operators_are_reported_by_name() -> anyhow::Result<()> {
    let json = sample_program()?.to_json_string()?;
    let mut value: Value = serde_json::from_str(&json)?;
    let nodes = value["modules"]["main"]
        .as_array_mut()
        .expect("main is a list of nodes");
    let relu = nodes
        .iter_mut()
        .find(|node| node["name"] == "relu")
        .expect("relu node");
    relu["name"] = Value::from("gelu_erf");
    let err = Program::from_json_str(&value.to_string()).unwrap_err();
    assert!(matches!(err, LoadError::UnknownOperator(ref name) if name == "gelu_erf"), "{err}");
    Ok(())
}

#[test]
fn missing_main_is_malformed() {
    let doc = serde_json::json!({
        "version": FILE_FORMAT_VERSION,
        "software_version": graphc::program::SOFTWARE_VERSION,
        "targets": [],
        "contexts": [],
        "modules": {}
    });
    let err = Program::from_json_str(&doc.to_string()).unwrap_err();
    assert!(matches!(err, LoadError::Malformed(_)), "{err}");
}

#[test]
fn garbage_is_a_json_error() {
    assert!(matches!(Program::from_json_str("{ not json"), Err(LoadError::Json(_))));
}

#[test]
fn unknown_targets_are_reported_by_name() -> anyhow::Result<()> {
    let json = sample_program()?.to_json_string()?;
    let mut value: Value = serde_json::from_str(&json)?;
    value["targets"] = serde_json::json!(["no_such_target"]);
    value["contexts"] = serde_json::json!([null]);
    let err = Program::from_json_str(&value.to_string()).unwrap_err();
    assert!(matches!(err, LoadError::UnknownTarget(ref name) if name == "no_such_target"), "{err}");
    Ok(())
}

#[test]
fn sub_modules_round_trip() -> anyhow::Result<()> {
    let mut program = Program::new();
    let then_id = program.create_module("then")?;
    let else_id = program.create_module("else")?;
    for (id, op) in [
        (then_id, Operation::new(Neg {})),
        (else_id, Operation::new(Add {})),
    ] {
        let module = program.module_mut(id)?;
        let a = module.add_parameter("a", f32s(&[2]))?;
        let out = if op.name() == "add" {
            module.add_instruction(op, &[a, a])?
        } else {
            module.add_instruction(op, &[a])?
        };
        module.add_return(&[out])?;
    }
    let main_id = program.main_id();
    let cond = program
        .main_module_mut()
        .add_parameter("cond", Shape::new(DType::Bool, [1]))?;
    let x = program.main_module_mut().add_parameter("x", f32s(&[2]))?;
    let branch = program.add_instruction_with_modules(
        main_id,
        Operation::new(If {}),
        &[cond, x],
        &[then_id, else_id],
    )?;
    program.main_module_mut().add_return(&[branch])?;

    let mut loaded = Program::from_json_str(&program.to_json_string()?)?;
    assert!(loaded.get_module("then").is_some());
    assert!(loaded.get_module("else").is_some());
    for flag in [true, false] {
        let params = HashMap::from([
            ("cond".to_string(), Argument::from_vec([1], vec![flag])?),
            ("x".to_string(), Argument::from_vec([2], vec![1.0f32, 2.0])?),
        ]);
        assert_eq!(loaded.eval(&params)?, program.eval(&params)?);
    }
    Ok(())
}

#[test]
fn save_and_load_through_a_file() -> anyhow::Result<()> {
    let mut program = sample_program()?;
    let path = std::env::temp_dir().join(format!("graphc-save-{}.json", std::process::id()));
    program.save(&path)?;
    let mut loaded = Program::load(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(loaded.eval(&x_binding()?)?, program.eval(&x_binding()?)?);
    Ok(())
}

#[test]
fn loading_a_missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("graphc-definitely-missing.json");
    assert!(matches!(Program::load(path), Err(LoadError::Io(_))));
}
