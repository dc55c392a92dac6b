//! Solutions: the rule tree with concrete choices committed.
//!
//! `Solution::audit` is the only operation that touches the claim ledger.
//! Claim conflicts are absorbed here: a failed claim makes the candidate
//! fail, it never aborts the audit.

use tracing::debug;

use areaudit_core::{AnyAssertion, CourseInstance, Predicate, ResolvedAssertion, RulePath};

use crate::context::AuditContext;
use crate::result::{
    ConditionalResult, CountItemResult, CountResult, CourseResult, ProficiencyResult, QueryResult,
    RequirementResult, RuleResult,
};
use crate::rule::{CourseRule, ProficiencyRule, QuerySource, RequirementRule, Rule};

#[derive(Debug, Clone)]
pub enum Solution {
    Course(CourseSolution),
    Count(CountSolution),
    Query(QuerySolution),
    Requirement(RequirementSolution),
    Proficiency(ProficiencySolution),
    Conditional(ConditionalSolution),
}

#[derive(Debug, Clone)]
pub struct CourseSolution {
    pub rule: CourseRule,
}

#[derive(Debug, Clone)]
pub enum CountItem {
    /// A child selected by this combination, with its committed solution.
    Solved(Solution),
    /// A child left out of this combination; reported for explainability.
    Skipped(Box<Rule>),
}

#[derive(Debug, Clone)]
pub struct CountSolution {
    pub count: usize,
    pub at_most: bool,
    pub audit_clauses: Vec<AnyAssertion>,
    pub items: Vec<CountItem>,
    pub path: RulePath,
}

#[derive(Debug, Clone)]
pub struct QuerySolution {
    pub rule: crate::rule::QueryRule,
    /// Committed candidate set; empty for sources resolved at audit time.
    pub courses: Vec<CourseInstance>,
}

#[derive(Debug, Clone)]
pub struct RequirementSolution {
    pub rule: RequirementRule,
    pub overridden: bool,
    pub result: Option<Box<Solution>>,
}

#[derive(Debug, Clone)]
pub struct ProficiencySolution {
    pub rule: ProficiencyRule,
    pub held: bool,
    pub course: Option<Box<Solution>>,
}

#[derive(Debug, Clone)]
pub struct ConditionalSolution {
    pub condition: Predicate,
    pub taken_true: bool,
    pub path: RulePath,
    pub result: Option<Box<Solution>>,
}

impl Solution {
    pub fn path(&self) -> &RulePath {
        match self {
            Solution::Course(s) => &s.rule.path,
            Solution::Count(s) => &s.path,
            Solution::Query(s) => &s.rule.path,
            Solution::Requirement(s) => &s.rule.path,
            Solution::Proficiency(s) => &s.rule.path,
            Solution::Conditional(s) => &s.path,
        }
    }

    /// Audit this solution into a result. Pure except for the ledger inside
    /// `ctx`.
    pub fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        match self {
            Solution::Course(s) => s.audit(ctx),
            Solution::Count(s) => s.audit(ctx),
            Solution::Query(s) => s.audit(ctx),
            Solution::Requirement(s) => s.audit(ctx),
            Solution::Proficiency(s) => s.audit(ctx),
            Solution::Conditional(s) => s.audit(ctx),
        }
    }
}

impl CourseSolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let rule = &self.rule;

        if ctx.solve.is_overridden(&rule.path) {
            return RuleResult::Course(CourseResult {
                rule: rule.clone(),
                course: None,
                claim: None,
                overridden: true,
            });
        }

        let Some(course) = rule.find_course(&ctx.solve) else {
            debug!(path = %rule.path, course = %rule.reference(), "course not in transcript");
            return RuleResult::Course(CourseResult {
                rule: rule.clone(),
                course: None,
                claim: None,
                overridden: false,
            });
        };

        if let Some(minimum) = rule.grade {
            if course.grade_points < minimum {
                debug!(path = %rule.path, clbid = %course.clbid, "grade below the rule's minimum");
                return RuleResult::Course(CourseResult {
                    rule: rule.clone(),
                    course: Some(course),
                    claim: None,
                    overridden: false,
                });
            }
        }

        let clause = rule.as_claim_clause();
        let claim = ctx.make_claim(&course, &rule.path, Some(&clause), rule.allow_claimed, true);

        RuleResult::Course(CourseResult {
            rule: rule.clone(),
            course: Some(course),
            claim: Some(claim),
            overridden: false,
        })
    }
}

impl CountSolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let overridden = ctx.solve.is_overridden(&self.path);

        let items: Vec<CountItemResult> = self
            .items
            .iter()
            .map(|item| match item {
                CountItem::Solved(solution) => CountItemResult::Audited(solution.audit(ctx)),
                CountItem::Skipped(rule) => CountItemResult::Skipped((**rule).clone()),
            })
            .collect();

        // audit clauses look at the combined matched set of the children
        let matched: Vec<CourseInstance> = {
            let clbids: std::collections::BTreeSet<String> = items
                .iter()
                .filter_map(|item| match item {
                    CountItemResult::Audited(result) => Some(result.matched_clbids()),
                    CountItemResult::Skipped(_) => None,
                })
                .flatten()
                .collect();
            ctx.solve
                .transcript()
                .iter()
                .filter(|c| clbids.contains(&c.clbid))
                .cloned()
                .collect()
        };

        let audit_results: Vec<ResolvedAssertion> = self
            .audit_clauses
            .iter()
            .filter_map(|clause| clause.resolve(&matched))
            .collect();

        RuleResult::Count(CountResult {
            count: self.count,
            at_most: self.at_most,
            items,
            audit_results,
            overridden,
            path: self.path.clone(),
        })
    }
}

impl QuerySolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let rule = &self.rule;
        let overridden = ctx.solve.is_overridden(&rule.path);

        if rule.source == QuerySource::Areas {
            let resolved: Vec<ResolvedAssertion> = rule
                .assertions
                .iter()
                .filter_map(|a| match a {
                    AnyAssertion::Single(single) => Some(single.evaluate_areas(ctx.solve.areas())),
                    AnyAssertion::Conditional { .. } => a.resolve(&[]),
                })
                .collect();
            return RuleResult::Query(QueryResult {
                rule: rule.clone(),
                claims: vec![],
                successful: vec![],
                resolved,
                overridden,
            });
        }

        let courses: Vec<CourseInstance> = match rule.source {
            QuerySource::Claimed => ctx.claimed_courses(),
            _ => self.courses.clone(),
        };

        let mut claims = Vec::with_capacity(courses.len());
        let mut successful = Vec::with_capacity(courses.len());
        for course in &courses {
            let attempt = ctx.make_claim(
                course,
                &rule.path,
                rule.where_clause.as_ref(),
                rule.allow_claimed,
                rule.attempt_claims,
            );
            if !attempt.failed {
                successful.push(course.clone());
            }
            claims.push(attempt);
        }

        let resolved: Vec<ResolvedAssertion> = rule
            .assertions
            .iter()
            .filter_map(|a| a.resolve(&successful))
            .collect();

        RuleResult::Query(QueryResult {
            rule: rule.clone(),
            claims,
            successful,
            resolved,
            overridden,
        })
    }
}

impl RequirementSolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let result = self.result.as_ref().map(|inner| Box::new(inner.audit(ctx)));

        RuleResult::Requirement(RequirementResult {
            rule: self.rule.clone(),
            overridden: self.overridden || ctx.solve.is_overridden(&self.rule.path),
            result,
        })
    }
}

impl ProficiencySolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let course = self.course.as_ref().map(|inner| Box::new(inner.audit(ctx)));

        RuleResult::Proficiency(ProficiencyResult {
            rule: self.rule.clone(),
            held: self.held,
            course,
            overridden: ctx.solve.is_overridden(&self.rule.path),
        })
    }
}

impl ConditionalSolution {
    fn audit(&self, ctx: &mut AuditContext) -> RuleResult {
        let branch = self.result.as_ref().map(|inner| Box::new(inner.audit(ctx)));

        RuleResult::Conditional(ConditionalResult {
            condition: self.condition.clone(),
            taken_true: self.taken_true,
            branch,
            path: self.path.clone(),
            overridden: ctx.solve.is_overridden(&self.path),
        })
    }
}
