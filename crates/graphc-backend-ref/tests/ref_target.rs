use std::collections::HashMap;
use std::sync::Arc;

use graphc::ops::{Add, Mul, Operation, Relu};
use graphc::target::Target;
use graphc::{Argument, CompileOptions, DType, Program, Shape};
use graphc_backend_ref::{register_ref_target, Kernel, RefContext, RefTarget, KERNEL_NAME, TARGET_NAME};
use test_case::test_case;

fn f32_arg(values: &[f32]) -> Argument {
    Argument::from_vec([values.len()], values.to_vec()).expect("dense vector")
}

fn bindings(x: &[f32], y: &[f32]) -> HashMap<String, Argument> {
    HashMap::from([
        ("x".to_string(), f32_arg(x)),
        ("y".to_string(), f32_arg(y)),
    ])
}

/// `main(x, y) = relu((x + 0) * y)`
fn scaled_relu() -> anyhow::Result<Program> {
    let mut program = Program::new();
    let main = program.main_module_mut();
    let shape = Shape::new(DType::F32, [2]);
    let x = main.add_parameter("x", shape.clone())?;
    let y = main.add_parameter("y", shape)?;
    let zero = main.add_literal(f32_arg(&[0.0, 0.0]));
    let shifted = main.add_instruction(Operation::new(Add {}), &[x, zero])?;
    let product = main.add_instruction(Operation::new(Mul {}), &[shifted, y])?;
    let out = main.add_instruction(Operation::new(Relu {}), &[product])?;
    main.add_return(&[out])?;
    Ok(program)
}

fn compiled() -> anyhow::Result<Program> {
    let mut program = scaled_relu()?;
    let target: Arc<dyn Target> = Arc::new(RefTarget::new());
    program.compile(vec![target], &CompileOptions::default())?;
    Ok(program)
}

fn ref_context(program: &Program) -> &RefContext {
    program.contexts()[0]
        .as_any()
        .downcast_ref::<RefContext>()
        .expect("reference context")
}

#[test]
fn compile_removes_add_zero_and_lowers_the_rest() -> anyhow::Result<()> {
    let program = compiled()?;
    let main = program.main_module();
    let names: Vec<_> = main.iter().map(|ins| main[ins].name().to_string()).collect();
    assert_eq!(names, vec!["@param", "@param", KERNEL_NAME, KERNEL_NAME, "@return"]);

    let wrapped: Vec<_> = main
        .iter()
        .filter_map(|ins| main[ins].op().get::<Kernel>().map(|k| k.op.name().to_string()))
        .collect();
    assert_eq!(wrapped, vec!["mul", "relu"]);
    assert!(main.iter().all(|ins| main[ins].target() == 0));
    assert_eq!(program.targets()[0].name(), TARGET_NAME);
    Ok(())
}

#[test_case(&[1.0, -2.0], &[3.0, 4.0], &[3.0, 0.0] ; "mixed signs")]
#[test_case(&[0.5, 2.0], &[2.0, 0.5], &[1.0, 1.0] ; "positive")]
fn compiled_program_matches_host_eval(x: &[f32], y: &[f32], expected: &[f32]) -> anyhow::Result<()> {
    let mut host = scaled_relu()?;
    let mut program = compiled()?;
    let from_host = host.eval(&bindings(x, y))?;
    let from_ref = program.eval(&bindings(x, y))?;
    assert_eq!(from_ref, from_host);
    assert_eq!(from_ref[0].to_vec::<f32>()?, expected.to_vec());
    Ok(())
}

#[test]
fn eval_counts_launches_and_finishes() -> anyhow::Result<()> {
    let mut program = compiled()?;
    assert_eq!(ref_context(&program), &RefContext::default());

    program.eval(&bindings(&[1.0, 2.0], &[3.0, 4.0]))?;
    assert_eq!(
        ref_context(&program),
        &RefContext {
            launches: 2,
            finishes: 1
        }
    );
    Ok(())
}

#[test]
fn serialized_program_reloads_with_its_context() -> anyhow::Result<()> {
    register_ref_target();
    register_ref_target();
    assert!(graphc::target::list_targets().contains(&TARGET_NAME.to_string()));
    assert!(graphc::ops::operator_names().contains(&KERNEL_NAME.to_string()));

    let mut program = compiled()?;
    program.eval(&bindings(&[1.0, 2.0], &[3.0, 4.0]))?;
    let text = program.to_json_string()?;
    assert!(text.contains(KERNEL_NAME));

    let mut loaded = Program::from_json_str(&text)?;
    assert!(loaded.is_compiled());
    assert_eq!(loaded.targets()[0].name(), TARGET_NAME);
    assert_eq!(ref_context(&loaded), ref_context(&program));

    let params = bindings(&[-1.0, 5.0], &[2.0, 2.0]);
    assert_eq!(loaded.eval(&params)?, program.eval(&params)?);
    assert_eq!(ref_context(&loaded).launches, 4);
    Ok(())
}
