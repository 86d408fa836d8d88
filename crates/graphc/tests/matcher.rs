use graphc::matcher::{
    all_of, any, any_of, arg, args, either_arg, find_matches, func, has_value, is_constant,
    is_literal, is_param, match_instruction, name, name_any, nargs, none, none_of, output, pred,
    skip, skip_output, standard_shape, tree, unordered_tree, used_once, DynMatcher, MatchResult,
    Rule,
};
use graphc::ops::{Add, Contiguous, Mul, MultiBroadcast, Neg, Operation, Transpose};
use graphc::{Argument, DType, Error, InstRef, Module, Shape};

fn f32s(lens: &[usize]) -> Shape {
    Shape::new(DType::F32, lens.to_vec())
}

fn matches(module: &Module, ins: InstRef, m: &DynMatcher) -> Option<MatchResult> {
    match_instruction(module, ins, m)
}

#[test]
fn add_with_a_constant_operand() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let five = module.add_literal(Argument::from_vec([1], vec![5.0f32])?);
    let x = module.add_parameter("x", f32s(&[1]))?;
    let y = module.add_parameter("y", f32s(&[1]))?;
    let with_constant = module.add_instruction(Operation::new(Add {}), &[five, x])?;
    let without = module.add_instruction(Operation::new(Add {}), &[x, y])?;

    let m = name("add").with(either_arg(0, 1, is_constant(), any()));
    let hit = matches(&module, with_constant, &m).expect("constant operand matches");
    assert_eq!(hit.result, with_constant);
    assert!(hit.instructions.is_empty());
    assert!(matches(&module, without, &m).is_none());
    Ok(())
}

#[test]
fn either_arg_binds_whichever_side_fits() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let c = module.add_literal(Argument::from_vec([2], vec![1.0f32, 2.0])?);
    let sum = module.add_instruction(Operation::new(Add {}), &[x, c])?;

    let m = either_arg(0, 1, is_constant().bind("c"), any().bind("x"));
    let hit = matches(&module, sum, &m).expect("swapped order matches");
    assert_eq!(hit.get("c")?, c);
    assert_eq!(hit.get("x")?, x);
    Ok(())
}

#[test]
fn unbound_names_are_lookup_errors() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let hit = matches(&module, x, &any().bind("x")).expect("any matches");
    assert_eq!(hit.get("x")?, x);
    assert!(matches!(hit.get("y"), Err(Error::Lookup(_))));
    Ok(())
}

#[test]
fn composition_laws() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let neg = module.add_instruction(Operation::new(Neg {}), &[x])?;

    assert!(matches(&module, neg, &all_of(Vec::<DynMatcher>::new())).is_some());
    assert!(matches(&module, neg, &any_of(Vec::<DynMatcher>::new())).is_none());
    assert!(matches(&module, neg, &none_of(Vec::<DynMatcher>::new())).is_some());
    assert!(matches(&module, neg, &none()).is_none());

    assert!(matches(&module, neg, &all_of([name("neg"), nargs(1)])).is_some());
    assert!(matches(&module, neg, &all_of([name("neg"), nargs(2)])).is_none());
    assert!(matches(&module, neg, &any_of([name("add"), name("neg")])).is_some());
    assert!(matches(&module, neg, &none_of([name("add"), is_param()])).is_some());
    assert!(matches(&module, x, &none_of([name("add"), is_param()])).is_none());
    assert!(matches(&module, neg, &name_any(["relu", "neg"])).is_some());
    assert!(matches(&module, neg, &graphc::any_of![name("exp"), name("neg")]).is_some());
    Ok(())
}

#[test]
fn single_any_of_and_empty_skip_are_transparent() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let y = module.add_parameter("y", f32s(&[2]))?;
    let neg = module.add_instruction(Operation::new(Neg {}), &[x])?;
    let sum = module.add_instruction(Operation::new(Add {}), &[neg, y])?;
    let nodes = [x, y, neg, sum];

    let patterns = [
        name("neg").with(arg(0, any().bind("x"))),
        either_arg(0, 1, is_param().bind("p"), name("neg").bind("n")),
        any().bind("root"),
        none(),
    ];
    for m in &patterns {
        for &ins in &nodes {
            let direct = matches(&module, ins, m);
            assert_eq!(matches(&module, ins, &any_of([m.clone()])), direct);
            assert_eq!(matches(&module, ins, &skip([none()], m.clone())), direct);
        }
    }
    let hit = matches(&module, sum, &any_of([patterns[1].clone()])).expect("sum matches");
    assert_eq!((hit.get("p")?, hit.get("n")?), (y, neg));
    Ok(())
}

#[test]
fn failed_branches_leave_no_bindings() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let neg = module.add_instruction(Operation::new(Neg {}), &[x])?;

    let m = any_of([
        all_of([any().bind("first"), name("add")]),
        name("neg").bind("second"),
    ]);
    let hit = matches(&module, neg, &m).expect("second branch matches");
    assert!(hit.get("first").is_err());
    assert_eq!(hit.get("second")?, neg);

    let negated = none_of([any().bind("ghost")]);
    assert!(matches(&module, neg, &negated).is_none());
    Ok(())
}

#[test]
fn args_requires_exact_arity() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let y = module.add_parameter("y", f32s(&[2]))?;
    let sum = module.add_instruction(Operation::new(Add {}), &[x, y])?;

    let exact = args([is_param().bind("a"), is_param().bind("b")]);
    let hit = matches(&module, sum, &exact).expect("both inputs are parameters");
    assert_eq!((hit.get("a")?, hit.get("b")?), (x, y));
    assert!(matches(&module, sum, &args([is_param()])).is_none());
    assert!(matches(&module, sum, &graphc::args![any(), any(), any()]).is_none());
    assert!(matches(&module, sum, &arg(1, any().bind("rhs"))).is_some_and(|r| r.get("rhs") == Ok(y)));
    assert!(matches(&module, sum, &arg(2, any())).is_none());
    Ok(())
}

#[test]
fn predicates_inspect_the_instruction() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let t = module.add_instruction(Operation::new(Transpose::new(vec![1, 0])), &[x])?;
    let zero = module.add_literal(Argument::scalar(0.0f32));
    let zeros = module.add_instruction(Operation::new(MultiBroadcast::new(vec![3, 2])), &[zero])?;
    let sum = module.add_instruction(Operation::new(Add {}), &[t, zeros])?;

    assert!(matches(&module, x, &standard_shape()).is_some());
    assert!(matches(&module, t, &standard_shape()).is_none());
    assert!(matches(&module, zero, &is_literal()).is_some());
    assert!(matches(&module, zeros, &is_literal()).is_none());
    assert!(matches(&module, zeros, &has_value(0.0)).is_some());
    assert!(matches(&module, zeros, &has_value(1.0)).is_none());
    assert!(matches(&module, t, &used_once()).is_some());
    assert!(matches(&module, sum, &used_once()).is_none());
    let big = pred(|module, ins| module[ins].shape().elements().is_ok_and(|n| n > 4));
    assert!(matches(&module, sum, &big).is_some());
    Ok(())
}

#[test]
fn output_looks_at_users() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let neg = module.add_instruction(Operation::new(Neg {}), &[x])?;
    module.add_instruction(Operation::new(Mul {}), &[neg, x])?;

    let m = output(name("mul").bind("user"));
    let hit = matches(&module, neg, &m).expect("neg feeds a mul");
    assert_eq!(hit.result, neg);
    assert!(matches(&module, neg, &output(name("add"))).is_none());
    Ok(())
}

#[test]
fn skip_walks_through_layout_nodes() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2, 3]))?;
    let t = module.add_instruction(Operation::new(Transpose::new(vec![1, 0])), &[x])?;
    let c = module.add_instruction(Operation::new(Contiguous {}), &[t])?;
    let neg = module.add_instruction(Operation::new(Neg {}), &[c])?;

    let layout = || [name("transpose"), name("contiguous")];
    let hit = matches(&module, c, &skip(layout(), is_param().bind("source"))).expect("reaches x");
    assert_eq!(hit.get("source")?, x);
    assert_eq!(hit.result, x);

    let down = skip_output(layout(), name("neg").bind("consumer"));
    let hit = matches(&module, x, &down).expect("reaches neg");
    assert_eq!(hit.get("consumer")?, neg);
    assert_eq!(hit.result, x);
    Ok(())
}

#[test]
fn tree_flattens_nested_operators() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let a = module.add_literal(Argument::from_vec([2], vec![1.0f32, 1.0])?);
    let x = module.add_parameter("x", f32s(&[2]))?;
    let y = module.add_parameter("y", f32s(&[2]))?;
    let inner = module.add_instruction(Operation::new(Add {}), &[x, a])?;
    let outer = module.add_instruction(Operation::new(Add {}), &[inner, y])?;

    let ordered = tree("add", [is_param().bind("p"), is_literal(), is_param().bind("q")]);
    let hit = matches(&module, outer, &ordered).expect("leaves are x, a, y");
    assert_eq!((hit.get("p")?, hit.get("q")?), (x, y));
    assert!(matches(&module, outer, &tree("add", [is_literal(), is_param(), is_param()])).is_none());
    assert!(matches(&module, outer, &tree("mul", [any(), any(), any()])).is_none());

    let unordered = unordered_tree("add", [is_literal().bind("c"), is_param(), is_param()]);
    let hit = matches(&module, outer, &unordered).expect("leaves form the multiset");
    assert_eq!(hit.get("c")?, a);
    assert!(matches(&module, outer, &graphc::unordered_tree!("add", is_literal(), is_literal(), any())).is_none());
    Ok(())
}

#[test]
fn func_sees_earlier_bindings() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let y = module.add_parameter("y", f32s(&[2]))?;
    let square = module.add_instruction(Operation::new(Mul {}), &[x, x])?;
    let product = module.add_instruction(Operation::new(Mul {}), &[x, y])?;

    let same_as_a = func(|ctx, ins| (ctx.bound("a") == Some(ins)).then_some(ins));
    let m = args([any().bind("a"), same_as_a]);
    assert!(matches(&module, square, &m).is_some());
    assert!(matches(&module, product, &m).is_none());
    Ok(())
}

struct NegNeg;

impl Rule for NegNeg {
    fn name(&self) -> &str {
        "neg_neg"
    }

    fn matcher(&self) -> DynMatcher {
        name("neg").with(arg(0, name("neg").with(arg(0, any().bind("x")))))
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> graphc::Result<()> {
        module.replace_uses(result.result, result.get("x")?)?;
        module.erase(result.result)
    }
}

#[test]
fn find_matches_applies_rules_in_module_order() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let n1 = module.add_instruction(Operation::new(Neg {}), &[x])?;
    let n2 = module.add_instruction(Operation::new(Neg {}), &[n1])?;
    let relu = module.add_instruction(Operation::new(graphc::ops::Relu {}), &[n2])?;
    module.add_return(&[relu])?;

    let applied = find_matches(&mut module, &[&NegNeg])?;
    assert_eq!(applied, 1);
    assert_eq!(module[relu].inputs(), &[x]);
    assert!(!module.contains(n2));
    assert_eq!(module.validate(), None);
    assert_eq!(find_matches(&mut module, &[&NegNeg])?, 0);
    Ok(())
}

/// Erases `neg(x)` together with its only user when that user is an unused `neg`.
struct DropDeadNegPair;

impl Rule for DropDeadNegPair {
    fn matcher(&self) -> DynMatcher {
        pred(|module, ins| {
            let inst = &module[ins];
            match inst.outputs() {
                [user] => {
                    inst.name() == "neg"
                        && module[*user].name() == "neg"
                        && module[*user].outputs().is_empty()
                }
                _ => false,
            }
        })
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> graphc::Result<()> {
        let user = module[result.result].outputs()[0];
        module.erase(user)?;
        module.erase(result.result)
    }
}

#[derive(Default)]
struct CountRelu {
    seen: std::cell::Cell<usize>,
}

impl Rule for CountRelu {
    fn matcher(&self) -> DynMatcher {
        name("relu")
    }

    fn apply(&self, _module: &mut Module, _result: &MatchResult) -> graphc::Result<()> {
        self.seen.set(self.seen.get() + 1);
        Ok(())
    }
}

#[test]
fn find_matches_continues_after_erasing_the_successor() -> anyhow::Result<()> {
    let mut module = Module::new("main");
    let x = module.add_parameter("x", f32s(&[2]))?;
    let first = module.add_instruction(Operation::new(Neg {}), &[x])?;
    let second = module.add_instruction(Operation::new(Neg {}), &[first])?;
    let relu = module.add_instruction(Operation::new(graphc::ops::Relu {}), &[x])?;
    module.add_return(&[relu])?;

    let counter = CountRelu::default();
    let applied = find_matches(&mut module, &[&DropDeadNegPair, &counter])?;
    assert_eq!(applied, 2);
    assert_eq!(counter.seen.get(), 1);
    assert!(!module.contains(first));
    assert!(!module.contains(second));
    assert_eq!(module.len(), 3);
    assert_eq!(module.validate(), None);
    Ok(())
}
