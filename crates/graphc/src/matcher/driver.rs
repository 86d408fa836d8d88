use std::collections::HashSet;

use super::{match_instruction, DynMatcher, MatchResult};
use crate::error::{Error, Result};
use crate::ir::{InstRef, Module};

/// A pattern plus the rewrite applied when it matches.
pub trait Rule {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn matcher(&self) -> DynMatcher;

    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<()>;
}

/// Visits every instruction once in module order and applies the first rule that
/// matches it. Returns the number of rewrites applied.
///
/// Instructions before the current one are never revisited in the same call;
/// callers that need a fixed point invoke this again until it returns 0. When a
/// rewrite erases the current instruction together with its successor, the walk
/// resumes after the nearest surviving predecessor.
pub fn find_matches(module: &mut Module, rules: &[&dyn Rule]) -> Result<usize> {
    let matchers: Vec<DynMatcher> = rules.iter().map(|rule| rule.matcher()).collect();
    let trace = crate::env::trace_matches();
    let validate = crate::env::validate_matches();
    let mut applied = 0usize;
    let mut visited: HashSet<InstRef> = HashSet::new();
    let mut cursor = module.first();
    while let Some(ins) = cursor {
        visited.insert(ins);
        let saved_prev = module.prev(ins);
        let saved_next = module.next(ins);
        let hit = rules
            .iter()
            .zip(matchers.iter())
            .find_map(|(rule, m)| match_instruction(module, ins, m).map(|r| (*rule, r)));
        if let Some((rule, result)) = hit {
            if trace {
                tracing::debug!(
                    rule = rule.name(),
                    module = module.name(),
                    instruction = %module.print_instruction(ins),
                    "matched"
                );
            }
            rule.apply(module, &result)?;
            applied += 1;
            if validate {
                if let Some(bad) = module.validate() {
                    let position = module.position(bad).unwrap_or_default();
                    let rendered = module.print_instruction(bad);
                    tracing::error!(
                        rule = rule.name(),
                        module = module.name(),
                        position,
                        instruction = %rendered,
                        "rewrite left the module invalid"
                    );
                    return Err(Error::structural(
                        module.name(),
                        position,
                        format!("invalid after rule `{}`: {rendered}", rule.name()),
                    ));
                }
            }
        }
        cursor = if module.contains(ins) {
            module.next(ins)
        } else if let Some(next) = saved_next.filter(|next| module.contains(*next)) {
            Some(next)
        } else if let Some(prev) = saved_prev.filter(|prev| module.contains(*prev)) {
            module.next(prev)
        } else {
            module.iter().find(|candidate| !visited.contains(candidate))
        };
    }
    Ok(applied)
}
