//! Subgraph pattern matching.
//!
//! A matcher is any value implementing [`Matcher`]: given a [`MatcherContext`] and
//! an instruction it returns the matched instruction or `None`. Combinators in
//! [`combinators`] build bigger patterns from smaller ones without looking inside
//! them. Named captures recorded with [`DynMatcher::bind`] end up in the
//! [`MatchResult`] handed to a [`Rule`]'s rewrite.
//!
//! ```
//! use graphc::matcher::{any, either_arg, is_constant, name};
//!
//! // add(constant, x) or add(x, constant)
//! let m = name("add").with(either_arg(0, 1, is_constant(), any().bind("x")));
//! # let _ = m;
//! ```

mod combinators;
mod driver;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ir::{InstRef, Module};

pub use combinators::{
    all_of, any, any_of, arg, args, either_arg, func, has_value, is_constant, is_literal,
    is_param, name, name_any, nargs, none, none_of, output, pred, skip, skip_output,
    standard_shape, tree, unordered_tree, used_once,
};
pub use driver::{find_matches, Rule};

/// Per-attempt matching state: the module being inspected and the named captures.
pub struct MatcherContext<'m> {
    module: &'m Module,
    bindings: HashMap<String, InstRef>,
}

impl<'m> MatcherContext<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            bindings: HashMap::new(),
        }
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn bind(&mut self, name: impl Into<String>, ins: InstRef) {
        self.bindings.insert(name.into(), ins);
    }

    pub fn bound(&self, name: &str) -> Option<InstRef> {
        self.bindings.get(name).copied()
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, InstRef> {
        self.bindings.clone()
    }

    pub(crate) fn restore(&mut self, snapshot: HashMap<String, InstRef>) {
        self.bindings = snapshot;
    }
}

pub trait Matcher: Send + Sync {
    fn matches(&self, ctx: &mut MatcherContext<'_>, ins: InstRef) -> Option<InstRef>;
}

impl<F> Matcher for F
where
    F: Fn(&mut MatcherContext<'_>, InstRef) -> Option<InstRef> + Send + Sync,
{
    fn matches(&self, ctx: &mut MatcherContext<'_>, ins: InstRef) -> Option<InstRef> {
        self(ctx, ins)
    }
}

/// Shared, type-erased matcher. Every combinator produces one.
#[derive(Clone)]
pub struct DynMatcher(Arc<dyn Matcher>);

impl DynMatcher {
    pub fn new(matcher: impl Matcher + 'static) -> Self {
        DynMatcher(Arc::new(matcher))
    }

    /// Records the matched instruction under `name`.
    pub fn bind(self, name: impl Into<String>) -> DynMatcher {
        let name = name.into();
        func(move |ctx, ins| {
            let result = self.matches(ctx, ins)?;
            ctx.bind(name.clone(), result);
            Some(result)
        })
    }

    /// Conjunction with `other` on the same instruction.
    pub fn with(self, other: DynMatcher) -> DynMatcher {
        all_of([self, other])
    }
}

impl Matcher for DynMatcher {
    fn matches(&self, ctx: &mut MatcherContext<'_>, ins: InstRef) -> Option<InstRef> {
        self.0.matches(ctx, ins)
    }
}

impl fmt::Debug for DynMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynMatcher")
    }
}

/// Outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub result: InstRef,
    pub instructions: HashMap<String, InstRef>,
}

impl MatchResult {
    /// Instruction captured as `name`.
    pub fn get(&self, name: &str) -> Result<InstRef> {
        self.instructions
            .get(name)
            .copied()
            .ok_or_else(|| Error::lookup(format!("no instruction bound to `{name}`")))
    }
}

/// Matches `matcher` rooted at `ins`.
pub fn match_instruction(
    module: &Module,
    ins: InstRef,
    matcher: &dyn Matcher,
) -> Option<MatchResult> {
    if !module.contains(ins) {
        return None;
    }
    let mut ctx = MatcherContext::new(module);
    let result = matcher.matches(&mut ctx, ins)?;
    Some(MatchResult {
        result,
        instructions: ctx.bindings,
    })
}

#[macro_export]
macro_rules! all_of {
    ($($m:expr),* $(,)?) => {
        $crate::matcher::all_of([$($m),*])
    };
}

#[macro_export]
macro_rules! any_of {
    ($($m:expr),* $(,)?) => {
        $crate::matcher::any_of([$($m),*])
    };
}

#[macro_export]
macro_rules! none_of {
    ($($m:expr),* $(,)?) => {
        $crate::matcher::none_of([$($m),*])
    };
}

#[macro_export]
macro_rules! args {
    ($($m:expr),* $(,)?) => {
        $crate::matcher::args([$($m),*])
    };
}

#[macro_export]
macro_rules! tree {
    ($op:expr $(, $m:expr)* $(,)?) => {
        $crate::matcher::tree($op, [$($m),*])
    };
}

#[macro_export]
macro_rules! unordered_tree {
    ($op:expr $(, $m:expr)* $(,)?) => {
        $crate::matcher::unordered_tree($op, [$($m),*])
    };
}
