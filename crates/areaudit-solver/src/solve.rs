//! Best-result selection.
//!
//! The ordering contract: higher rank wins; ties break by higher max_rank,
//! then by a passing status, then by the lower-sorted path. Because every
//! enumeration source is itself sorted, the selected result is stable for
//! identical inputs.

use std::sync::Arc;

use areaudit_core::PredicateClause;

use crate::context::{AuditContext, SolveContext};
use crate::result::RuleResult;
use crate::rule::Rule;

/// Is `candidate` strictly better than `incumbent`?
pub fn is_better(candidate: &RuleResult, incumbent: &RuleResult) -> bool {
    if candidate.rank() != incumbent.rank() {
        return candidate.rank() > incumbent.rank();
    }
    if candidate.max_rank() != incumbent.max_rank() {
        return candidate.max_rank() > incumbent.max_rank();
    }
    if candidate.is_ok() != incumbent.is_ok() {
        return candidate.is_ok();
    }
    candidate.path() < incumbent.path()
}

/// Audit every solution of `rule` against fresh ledgers and keep the best
/// result. Used by the common major requirements, which run nested audits
/// inside the main one.
pub fn find_best_solution(
    rule: &Rule,
    ctx: &SolveContext,
    multicountable: Arc<Vec<Vec<PredicateClause>>>,
) -> Option<RuleResult> {
    let mut best: Option<RuleResult> = None;

    for solution in rule.solutions(ctx) {
        let mut audit_ctx = AuditContext::new(ctx.clone(), multicountable.clone());
        let result = solution.audit(&mut audit_ctx);

        let better = match &best {
            None => true,
            Some(incumbent) => is_better(&result, incumbent),
        };
        if better {
            let done = result.is_ok();
            best = Some(result);
            if done {
                // nothing outranks a passing result of the same shape
                break;
            }
        }
    }

    best
}
