use super::{DynMatcher, Matcher, MatcherContext};
use crate::ir::{InstRef, Module};
use crate::ops::{Literal, Param};

/// Wraps a context-aware function.
pub fn func<F>(f: F) -> DynMatcher
where
    F: Fn(&mut MatcherContext<'_>, InstRef) -> Option<InstRef> + Send + Sync + 'static,
{
    DynMatcher::new(f)
}

/// Wraps a boolean test on one instruction.
pub fn pred<F>(f: F) -> DynMatcher
where
    F: Fn(&Module, InstRef) -> bool + Send + Sync + 'static,
{
    func(move |ctx, ins| f(ctx.module(), ins).then_some(ins))
}

pub fn any() -> DynMatcher {
    func(|_, ins| Some(ins))
}

pub fn none() -> DynMatcher {
    func(|_, _| None)
}

/// Operator name equals `op`.
pub fn name(op: impl Into<String>) -> DynMatcher {
    let op = op.into();
    pred(move |module, ins| module[ins].name() == op)
}

pub fn name_any<I, S>(ops: I) -> DynMatcher
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ops: Vec<String> = ops.into_iter().map(Into::into).collect();
    pred(move |module, ins| ops.iter().any(|op| module[ins].name() == op))
}

/// Folds to a constant.
pub fn is_constant() -> DynMatcher {
    pred(|module, ins| module.can_eval(ins))
}

pub fn is_literal() -> DynMatcher {
    pred(|module, ins| module[ins].op().is::<Literal>())
}

pub fn is_param() -> DynMatcher {
    pred(|module, ins| module[ins].op().is::<Param>())
}

pub fn standard_shape() -> DynMatcher {
    pred(|module, ins| module[ins].shape().standard())
}

pub fn nargs(count: usize) -> DynMatcher {
    pred(move |module, ins| module[ins].inputs().len() == count)
}

pub fn used_once() -> DynMatcher {
    pred(|module, ins| module[ins].outputs().len() == 1)
}

/// A literal, possibly behind layout operators, whose every element equals `value`.
pub fn has_value(value: f64) -> DynMatcher {
    pred(move |module, ins| {
        let mut current = ins;
        loop {
            let inst = &module[current];
            if let Some(literal) = inst.literal() {
                return literal
                    .to_f64_vec()
                    .is_ok_and(|values| values.iter().all(|&v| v == value));
            }
            match inst.inputs() {
                [input] if inst.op().is_movement() => current = *input,
                _ => return false,
            }
        }
    })
}

/// Input `index` matches `m`. Yields the instruction itself.
pub fn arg(index: usize, m: DynMatcher) -> DynMatcher {
    func(move |ctx, ins| {
        let input = *ctx.module()[ins].inputs().get(index)?;
        m.matches(ctx, input)?;
        Some(ins)
    })
}

/// Inputs match positionally and their count equals the number of matchers.
pub fn args(ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let ms: Vec<DynMatcher> = ms.into_iter().collect();
    func(move |ctx, ins| {
        let inputs = ctx.module()[ins].inputs().to_vec();
        if inputs.len() != ms.len() {
            return None;
        }
        let snapshot = ctx.snapshot();
        for (m, &input) in ms.iter().zip(inputs.iter()) {
            if m.matches(ctx, input).is_none() {
                ctx.restore(snapshot);
                return None;
            }
        }
        Some(ins)
    })
}

/// Inputs `i` and `j` match `m1` and `m2` in either order.
pub fn either_arg(i: usize, j: usize, m1: DynMatcher, m2: DynMatcher) -> DynMatcher {
    func(move |ctx, ins| {
        let inputs = ctx.module()[ins].inputs();
        let (a, b) = (*inputs.get(i)?, *inputs.get(j)?);
        for (x, y) in [(a, b), (b, a)] {
            let snapshot = ctx.snapshot();
            if m1.matches(ctx, x).is_some() && m2.matches(ctx, y).is_some() {
                return Some(ins);
            }
            ctx.restore(snapshot);
        }
        None
    })
}

/// Conjunction. The empty conjunction always matches.
pub fn all_of(ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let ms: Vec<DynMatcher> = ms.into_iter().collect();
    func(move |ctx, ins| {
        let snapshot = ctx.snapshot();
        for m in &ms {
            if m.matches(ctx, ins).is_none() {
                ctx.restore(snapshot);
                return None;
            }
        }
        Some(ins)
    })
}

/// Disjunction. The empty disjunction never matches.
pub fn any_of(ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let ms: Vec<DynMatcher> = ms.into_iter().collect();
    func(move |ctx, ins| {
        for m in &ms {
            let snapshot = ctx.snapshot();
            if let Some(result) = m.matches(ctx, ins) {
                return Some(result);
            }
            ctx.restore(snapshot);
        }
        None
    })
}

pub fn none_of(ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let inner = any_of(ms);
    func(move |ctx, ins| {
        let snapshot = ctx.snapshot();
        let matched = inner.matches(ctx, ins).is_some();
        ctx.restore(snapshot);
        (!matched).then_some(ins)
    })
}

/// Some user of the instruction matches `m`.
pub fn output(m: DynMatcher) -> DynMatcher {
    func(move |ctx, ins| {
        let users = ctx.module()[ins].outputs().to_vec();
        for user in users {
            let snapshot = ctx.snapshot();
            if m.matches(ctx, user).is_some() {
                return Some(ins);
            }
            ctx.restore(snapshot);
        }
        None
    })
}

fn matches_any(ctx: &mut MatcherContext<'_>, ms: &[DynMatcher], ins: InstRef) -> bool {
    let snapshot = ctx.snapshot();
    let hit = ms.iter().any(|m| m.matches(ctx, ins).is_some());
    ctx.restore(snapshot);
    hit
}

/// Walks up single-input instructions matching any of `skips`, then matches `m`.
pub fn skip(skips: impl IntoIterator<Item = DynMatcher>, m: DynMatcher) -> DynMatcher {
    let skips: Vec<DynMatcher> = skips.into_iter().collect();
    func(move |ctx, ins| {
        let mut current = ins;
        loop {
            let inputs = ctx.module()[current].inputs();
            let [input] = inputs else { break };
            let input = *input;
            if !matches_any(ctx, &skips, current) {
                break;
            }
            current = input;
        }
        m.matches(ctx, current)
    })
}

/// Walks down through sole users matching any of `skips`, then matches `m`.
pub fn skip_output(skips: impl IntoIterator<Item = DynMatcher>, m: DynMatcher) -> DynMatcher {
    let skips: Vec<DynMatcher> = skips.into_iter().collect();
    func(move |ctx, ins| {
        let mut current = ins;
        loop {
            let outputs = ctx.module()[current].outputs();
            let [user] = outputs else { break };
            let user = *user;
            if !matches_any(ctx, &skips, user) {
                break;
            }
            current = user;
        }
        let users = ctx.module()[current].outputs().to_vec();
        for user in users {
            let snapshot = ctx.snapshot();
            if m.matches(ctx, user).is_some() {
                return Some(ins);
            }
            ctx.restore(snapshot);
        }
        None
    })
}

/// Leaves of the tree of `op` instructions rooted at `ins`, left to right.
fn tree_leaves(module: &Module, op: &str, ins: InstRef) -> Vec<InstRef> {
    let mut leaves = Vec::new();
    let mut stack: Vec<InstRef> = module[ins].inputs().iter().rev().copied().collect();
    while let Some(current) = stack.pop() {
        let inst = &module[current];
        if inst.name() == op {
            stack.extend(inst.inputs().iter().rev().copied());
        } else {
            leaves.push(current);
        }
    }
    leaves
}

/// Flattens nested `op` instructions and matches the leaves in order.
pub fn tree(op: impl Into<String>, ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let op = op.into();
    let ms: Vec<DynMatcher> = ms.into_iter().collect();
    func(move |ctx, ins| {
        if ctx.module()[ins].name() != op {
            return None;
        }
        let leaves = tree_leaves(ctx.module(), &op, ins);
        if leaves.len() != ms.len() {
            return None;
        }
        let snapshot = ctx.snapshot();
        for (m, &leaf) in ms.iter().zip(leaves.iter()) {
            if m.matches(ctx, leaf).is_none() {
                ctx.restore(snapshot);
                return None;
            }
        }
        Some(ins)
    })
}

/// Like [`tree`], but the leaves are matched as a multiset.
pub fn unordered_tree(op: impl Into<String>, ms: impl IntoIterator<Item = DynMatcher>) -> DynMatcher {
    let op = op.into();
    let ms: Vec<DynMatcher> = ms.into_iter().collect();
    func(move |ctx, ins| {
        if ctx.module()[ins].name() != op {
            return None;
        }
        let leaves = tree_leaves(ctx.module(), &op, ins);
        if leaves.len() != ms.len() {
            return None;
        }
        let mut used = vec![false; leaves.len()];
        assign(ctx, &ms, &leaves, &mut used, 0).then_some(ins)
    })
}

fn assign(
    ctx: &mut MatcherContext<'_>,
    ms: &[DynMatcher],
    leaves: &[InstRef],
    used: &mut [bool],
    next: usize,
) -> bool {
    let Some(m) = ms.get(next) else {
        return true;
    };
    for (slot, &leaf) in leaves.iter().enumerate() {
        if used[slot] {
            continue;
        }
        let snapshot = ctx.snapshot();
        if m.matches(ctx, leaf).is_some() {
            used[slot] = true;
            if assign(ctx, ms, leaves, used, next + 1) {
                return true;
            }
            used[slot] = false;
        }
        ctx.restore(snapshot);
    }
    false
}
