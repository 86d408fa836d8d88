use graphc::ops::{
    Add, Contiguous, Identity, MultiBroadcast, Neg, Operation, Relu, Reshape, Squeeze, Transpose,
};
use graphc::passes::{
    run_passes, DeadCodeElimination, EliminateContiguous, EliminateIdentity, NormalizeOps, Pass,
    PassResult, PipelineBuilder, PropagateConstant, SimplifyAlgebra, SimplifyReshapes,
};
use graphc::{Argument, DType, Error, InstRef, Module, Shape};

fn f32s(lens: &[usize]) -> Shape {
    Shape::new(DType::F32, lens.to_vec())
}

fn unary(module: &mut Module, op: Operation, input: InstRef) -> InstRef {
    module.add_instruction(op, &[input]).expect("valid instruction")
}

fn count(module: &Module, name: &str) -> usize {
    module.iter().filter(|&ins| module[ins].name() == name).count()
}

fn returned(module: &Module) -> InstRef {
    let ret = module.get_return().expect("module has a return");
    module[ret].inputs()[0]
}

#[test]
fn dce_drops_unused_instructions() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let unused = module.add_parameter("unused", f32s(&[2]))?;
    let dead = unary(&mut module, Operation::new(Neg {}), x);
    unary(&mut module, Operation::new(Relu {}), dead);
    let live = unary(&mut module, Operation::new(Neg {}), x);
    module.add_return(&[live])?;

    let stats = DeadCodeElimination.run(&mut module)?;
    assert!(stats.changed);
    assert_eq!(stats.erased_insts, 2);
    assert!(!module.contains(dead));
    assert!(module.contains(unused));
    assert_eq!(module.len(), 4);
    assert!(!DeadCodeElimination.run(&mut module)?.changed);
    Ok(())
}

#[test]
fn dce_keeps_the_last_instruction_without_a_return() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    unary(&mut module, Operation::new(Neg {}), x);
    let last = unary(&mut module, Operation::new(Relu {}), x);
    DeadCodeElimination.run(&mut module)?;
    assert_eq!(module.len(), 2);
    assert_eq!(module.last(), Some(last));
    Ok(())
}

#[test]
fn identities_are_forwarded() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let id = unary(&mut module, Operation::new(Identity {}), x);
    let neg = unary(&mut module, Operation::new(Neg {}), id);
    module.add_return(&[neg])?;

    let stats = EliminateIdentity.run(&mut module)?;
    assert_eq!(stats.erased_insts, 1);
    assert_eq!(module[neg].inputs(), &[x]);
    assert_eq!(module.validate(), None);
    Ok(())
}

#[test]
fn contiguous_is_dropped_only_for_standard_inputs() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let copy = unary(&mut module, Operation::new(Contiguous {}), x);
    let t = unary(&mut module, Operation::new(Transpose::new(vec![1, 0])), copy);
    let packed = unary(&mut module, Operation::new(Contiguous {}), t);
    let neg = unary(&mut module, Operation::new(Neg {}), packed);
    module.add_return(&[neg])?;

    let stats = EliminateContiguous.run(&mut module)?;
    assert_eq!(stats.erased_insts, 1);
    assert!(!module.contains(copy));
    assert_eq!(module[t].inputs(), &[x]);
    assert!(module.contains(packed));
    assert_eq!(module.validate(), None);
    Ok(())
}

#[test]
fn normalize_resolves_negative_axes_once() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 1]))?;
    let sq = unary(&mut module, Operation::new(Squeeze { axes: vec![-1] }), x);
    module.add_return(&[sq])?;

    let stats = NormalizeOps.run(&mut module)?;
    assert!(stats.changed);
    assert_eq!(stats.rewrites_applied, 1);
    assert_eq!(module[sq].op(), &Operation::new(Squeeze::new([1])));
    assert_eq!(module[sq].shape(), &f32s(&[2]));
    assert!(module.iter().all(|ins| module[ins].normalized()));

    let again = NormalizeOps.run(&mut module)?;
    assert!(!again.changed);
    assert_eq!(again.rewrites_applied, 0);
    Ok(())
}

#[test]
fn constants_fold_into_literals() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let a = module.add_literal(Argument::from_vec([2], vec![1.0f32, 2.0])?);
    let b = module.add_literal(Argument::from_vec([2], vec![10.0f32, 20.0])?);
    let x = module.add_parameter("x", f32s(&[2]))?;
    let sum = module.add_instruction(Operation::new(Add {}), &[a, b])?;
    let out = module.add_instruction(Operation::new(Add {}), &[sum, x])?;
    module.add_return(&[out])?;

    let stats = PropagateConstant.run(&mut module)?;
    assert_eq!(stats.rewrites_applied, 1);
    DeadCodeElimination.run(&mut module)?;

    assert!(!module.contains(sum));
    let folded = module[out].inputs()[0];
    let literal = module[folded].literal().expect("folded to a literal");
    assert_eq!(literal.to_vec::<f32>()?, vec![11.0, 22.0]);
    assert_eq!(count(&module, "@literal"), 1);
    assert_eq!(module.validate(), None);
    Ok(())
}

#[test]
fn broadcast_constants_stay_symbolic() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let zero = module.add_literal(Argument::scalar(0.0f32));
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let zeros = unary(&mut module, Operation::new(MultiBroadcast::new(vec![2, 3])), zero);
    let out = module.add_instruction(Operation::new(Add {}), &[x, zeros])?;
    module.add_return(&[out])?;

    assert_eq!(PropagateConstant.run(&mut module)?.rewrites_applied, 0);
    assert!(module.contains(zeros));
    Ok(())
}

#[test]
fn adding_a_broadcast_zero_is_removed() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let zero = module.add_literal(Argument::scalar(0.0f32));
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let zeros = unary(&mut module, Operation::new(MultiBroadcast::new(vec![2, 3])), zero);
    let sum = module.add_instruction(Operation::new(Add {}), &[zeros, x])?;
    let neg = unary(&mut module, Operation::new(Neg {}), sum);
    module.add_return(&[neg])?;

    let stats = SimplifyAlgebra.run(&mut module)?;
    assert!(stats.changed);
    assert_eq!(module[neg].inputs(), &[x]);
    assert!(!module.contains(sum));
    Ok(())
}

#[test]
fn double_negation_cancels() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[4]))?;
    let n1 = unary(&mut module, Operation::new(Neg {}), x);
    let n2 = unary(&mut module, Operation::new(Neg {}), n1);
    module.add_return(&[n2])?;

    SimplifyAlgebra.run(&mut module)?;
    assert_eq!(returned(&module), x);
    DeadCodeElimination.run(&mut module)?;
    assert_eq!(count(&module, "neg"), 0);
    Ok(())
}

#[test]
fn constants_are_gathered_across_nested_adds() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let a = module.add_literal(Argument::from_vec([2], vec![1.0f32, 2.0])?);
    let b = module.add_literal(Argument::from_vec([2], vec![10.0f32, 20.0])?);
    let x = module.add_parameter("x", f32s(&[2]))?;
    let inner = module.add_instruction(Operation::new(Add {}), &[a, x])?;
    let outer = module.add_instruction(Operation::new(Add {}), &[inner, b])?;
    module.add_return(&[outer])?;

    let stats = SimplifyAlgebra.run(&mut module)?;
    assert_eq!(stats.rewrites_applied, 1);
    let [lhs, rhs] = module[outer].inputs() else {
        panic!("outer add has two inputs");
    };
    assert_eq!(*lhs, x);
    assert_eq!(module[*rhs].inputs(), &[a, b]);

    PropagateConstant.run(&mut module)?;
    DeadCodeElimination.run(&mut module)?;
    let folded = module[outer].inputs()[1];
    let literal = module[folded].literal().expect("constant part folded");
    assert_eq!(literal.to_vec::<f32>()?, vec![11.0, 22.0]);
    assert_eq!(module.validate(), None);
    Ok(())
}

#[test]
fn reshape_chain_collapses_to_one_reshape() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3, 4]))?;
    let r1 = unary(&mut module, Operation::new(Reshape::new([6, 4])), x);
    let r2 = unary(&mut module, Operation::new(Reshape::new([24])), r1);
    let r3 = unary(&mut module, Operation::new(Reshape::new([2, 12])), r2);
    let neg = unary(&mut module, Operation::new(Neg {}), r3);
    module.add_return(&[neg])?;

    let stats = SimplifyReshapes.run(&mut module)?;
    assert!(stats.changed);
    DeadCodeElimination.run(&mut module)?;
    assert_eq!(count(&module, "reshape"), 1);
    let reshape = module[neg].inputs()[0];
    assert_eq!(module[reshape].op(), &Operation::new(Reshape::new([2, 12])));
    assert_eq!(module[reshape].inputs(), &[x]);
    assert_eq!(module[neg].shape(), &f32s(&[2, 12]));
    Ok(())
}

#[test]
fn transpose_round_trip_disappears() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let t1 = unary(&mut module, Operation::new(Transpose::new(vec![1, 0])), x);
    let t2 = unary(&mut module, Operation::new(Transpose::new(vec![1, 0])), t1);
    let neg = unary(&mut module, Operation::new(Neg {}), t2);
    module.add_return(&[neg])?;

    SimplifyReshapes.run(&mut module)?;
    assert_eq!(module[neg].inputs(), &[x]);
    DeadCodeElimination.run(&mut module)?;
    assert_eq!(count(&module, "transpose"), 0);
    Ok(())
}

#[test]
fn minimal_chains_are_left_alone() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3, 4]))?;
    let r = unary(&mut module, Operation::new(Reshape::new([6, 4])), x);
    let t = unary(&mut module, Operation::new(Transpose::new(vec![1, 0])), r);
    let neg = unary(&mut module, Operation::new(Neg {}), t);
    module.add_return(&[neg])?;

    let stats = SimplifyReshapes.run(&mut module)?;
    assert!(!stats.changed);
    assert_eq!(module[neg].inputs(), &[t]);
    Ok(())
}

#[test]
fn pipeline_reaches_a_fixed_point() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let zero = module.add_literal(Argument::scalar(0.0f32));
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let id = unary(&mut module, Operation::new(Identity {}), x);
    let zeros = unary(&mut module, Operation::new(MultiBroadcast::new(vec![2, 3])), zero);
    let sum = module.add_instruction(Operation::new(Add {}), &[id, zeros])?;
    let n1 = unary(&mut module, Operation::new(Neg {}), sum);
    let n2 = unary(&mut module, Operation::new(Neg {}), n1);
    module.add_return(&[n2])?;

    let mut builder = PipelineBuilder::new();
    builder.pass(NormalizeOps).fixed_point(4, |b| {
        b.pass(EliminateIdentity)
            .pass(SimplifyAlgebra)
            .pass(DeadCodeElimination);
    });
    let steps = builder.finish();
    let stats = run_passes(&mut module, &steps)?;

    assert!(stats.changed);
    assert_eq!(stats.erased_insts, 4);
    assert_eq!(returned(&module), x);
    assert_eq!(module.len(), 2);
    Ok(())
}

#[test]
fn pass_results_accumulate() {
    let a = PassResult {
        changed: false,
        iterations: 1,
        rewrites_applied: 2,
        erased_insts: 0,
    };
    let b = PassResult {
        changed: true,
        iterations: 2,
        rewrites_applied: 1,
        erased_insts: 3,
    };
    assert_eq!(
        a.merge(b),
        PassResult {
            changed: true,
            iterations: 3,
            rewrites_applied: 3,
            erased_insts: 3,
        }
    );
}

/// Moves the return to the front, breaking definition order.
struct Scramble;

impl Pass for Scramble {
    fn name(&self) -> &'static str {
        "scramble"
    }

    fn run(&self, module: &mut Module) -> graphc::Result<PassResult> {
        let ret = module.get_return().expect("module has a return");
        let first = module.first().expect("module is not empty");
        module.move_instruction(ret, first)?;
        Ok(PassResult {
            changed: true,
            ..PassResult::default()
        })
    }
}

#[test]
fn invalid_modules_abort_the_pipeline() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let neg = unary(&mut module, Operation::new(Neg {}), x);
    module.add_return(&[neg])?;

    let mut builder = PipelineBuilder::new();
    builder.pass(Scramble).pass(DeadCodeElimination);
    let err = run_passes(&mut module, &builder.finish()).unwrap_err();
    match err {
        Error::Structural { module, position, message } => {
            assert_eq!(module, "main");
            assert_eq!(position, 0);
            assert!(message.contains("scramble"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}
