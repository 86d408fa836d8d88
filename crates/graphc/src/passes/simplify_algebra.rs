use super::{Pass, PassResult};
use crate::error::Result;
use crate::ir::Module;
use crate::matcher::{
    all_of, any, arg, args, either_arg, find_matches, has_value, is_constant, name, none_of, pred,
    unordered_tree, DynMatcher, MatchResult, Rule,
};
use crate::ops::{Add, Operation};

const MAX_SWEEPS: usize = 64;

fn has_users() -> DynMatcher {
    pred(|module, ins| !module[ins].outputs().is_empty())
}

/// Forwards the root's users to the instruction bound as `x`.
fn forward_x(module: &mut Module, result: &MatchResult) -> Result<()> {
    let x = result.get("x")?;
    module.replace_uses(result.result, x)?;
    module.erase(result.result)
}

/// `x + 0` and `0 + x`.
struct AddZero;

impl Rule for AddZero {
    fn name(&self) -> &str {
        "add_zero"
    }

    fn matcher(&self) -> DynMatcher {
        all_of([
            name("add"),
            has_users(),
            either_arg(0, 1, has_value(0.0), any().bind("x")),
        ])
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        forward_x(module, result)
    }
}

/// `x - 0`
struct SubZero;

impl Rule for SubZero {
    fn name(&self) -> &str {
        "sub_zero"
    }

    fn matcher(&self) -> DynMatcher {
        all_of([name("sub"), has_users(), args([any().bind("x"), has_value(0.0)])])
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        forward_x(module, result)
    }
}

/// `x * 1` and `1 * x`.
struct MulOne;

impl Rule for MulOne {
    fn name(&self) -> &str {
        "mul_one"
    }

    fn matcher(&self) -> DynMatcher {
        all_of([
            name("mul"),
            has_users(),
            either_arg(0, 1, has_value(1.0), any().bind("x")),
        ])
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        forward_x(module, result)
    }
}

/// `-(-x)`
struct DoubleNeg;

impl Rule for DoubleNeg {
    fn name(&self) -> &str {
        "double_neg"
    }

    fn matcher(&self) -> DynMatcher {
        all_of([
            name("neg"),
            has_users(),
            arg(0, name("neg").with(arg(0, any().bind("x")))),
        ])
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        forward_x(module, result)
    }
}

/// `(a + x) + b` with constants `a`, `b` becomes `x + (a + b)` so the constant
/// part folds.
struct GatherConstants;

impl Rule for GatherConstants {
    fn name(&self) -> &str {
        "gather_constants"
    }

    fn matcher(&self) -> DynMatcher {
        let constant_add = || all_of([name("add"), is_constant()]);
        all_of([
            unordered_tree(
                "add",
                [
                    is_constant().bind("a"),
                    is_constant().bind("b"),
                    none_of([is_constant()]).bind("x"),
                ],
            ),
            none_of([arg(0, constant_add()), arg(1, constant_add())]),
        ])
    }

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()> {
        let (a, b, x) = (result.get("a")?, result.get("b")?, result.get("x")?);
        let folded = module.insert_instruction(result.result, Operation::new(Add {}), &[a, b])?;
        module.replace_instruction(result.result, Operation::new(Add {}), &[x, folded])
    }
}

/// Arithmetic identities and constant regrouping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplifyAlgebra;

impl Pass for SimplifyAlgebra {
    fn name(&self) -> &'static str {
        "simplify_algebra"
    }

    fn run(&self, module: &mut Module) -> Result<PassResult> {
        let rules: [&dyn Rule; 5] = [&AddZero, &SubZero, &MulOne, &DoubleNeg, &GatherConstants];
        let mut totals = PassResult::default();
        for _ in 0..MAX_SWEEPS {
            let applied = find_matches(module, &rules)?;
            totals = totals.merge(PassResult::rewrites(applied));
            if applied == 0 {
                break;
            }
        }
        Ok(totals)
    }
}
