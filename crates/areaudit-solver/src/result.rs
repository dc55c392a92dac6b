//! Audited results: per-node pass/fail, rank, status, and claims.
//!
//! Ranks are exact rationals in [0, 1]; `rank == max_rank` is what makes a
//! node pass, and the invariant `rank <= max_rank` is checked after every
//! audit (a violation is bug-class and aborts with the offending path).

use serde_json::{json, Value as Json};
use std::collections::BTreeSet;

use areaudit_core::{
    AuditError, ClaimAttempt, CourseInstance, Fraction, Predicate, ResolvedAssertion, ResultStatus,
    RulePath,
};

use crate::rule::{AssertionMode, CourseRule, ProficiencyRule, QueryRule, RequirementRule, Rule};

#[derive(Debug, Clone)]
pub enum RuleResult {
    Course(CourseResult),
    Count(CountResult),
    Query(QueryResult),
    Requirement(RequirementResult),
    Proficiency(ProficiencyResult),
    Conditional(ConditionalResult),
}

#[derive(Debug, Clone)]
pub struct CourseResult {
    pub rule: CourseRule,
    pub course: Option<CourseInstance>,
    pub claim: Option<ClaimAttempt>,
    pub overridden: bool,
}

#[derive(Debug, Clone)]
pub enum CountItemResult {
    Audited(RuleResult),
    /// A child the chosen combination skipped; reported at zero rank.
    Skipped(Rule),
}

#[derive(Debug, Clone)]
pub struct CountResult {
    pub count: usize,
    pub at_most: bool,
    pub items: Vec<CountItemResult>,
    pub audit_results: Vec<ResolvedAssertion>,
    pub overridden: bool,
    pub path: RulePath,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub rule: QueryRule,
    pub claims: Vec<ClaimAttempt>,
    pub successful: Vec<CourseInstance>,
    pub resolved: Vec<ResolvedAssertion>,
    pub overridden: bool,
}

#[derive(Debug, Clone)]
pub struct RequirementResult {
    pub rule: RequirementRule,
    pub overridden: bool,
    pub result: Option<Box<RuleResult>>,
}

#[derive(Debug, Clone)]
pub struct ProficiencyResult {
    pub rule: ProficiencyRule,
    pub held: bool,
    pub course: Option<Box<RuleResult>>,
    pub overridden: bool,
}

#[derive(Debug, Clone)]
pub struct ConditionalResult {
    pub condition: Predicate,
    pub taken_true: bool,
    pub branch: Option<Box<RuleResult>>,
    pub path: RulePath,
    pub overridden: bool,
}

fn one() -> Fraction {
    Fraction::new(1, 1)
}

fn zero() -> Fraction {
    Fraction::new(0, 1)
}

/// Pending status from a set of matched courses, `Pass` when none are in
/// progress.
fn status_from_courses<'a>(courses: impl IntoIterator<Item = &'a CourseInstance>) -> ResultStatus {
    let mut status = ResultStatus::Pass;
    for course in courses {
        if course.is_in_progress_in_future {
            return ResultStatus::PendingRegistered;
        }
        if course.is_in_progress || course.is_in_progress_this_term {
            status = ResultStatus::PendingCurrent;
        }
    }
    status
}

impl RuleResult {
    pub fn path(&self) -> &RulePath {
        match self {
            RuleResult::Course(r) => &r.rule.path,
            RuleResult::Count(r) => &r.path,
            RuleResult::Query(r) => &r.rule.path,
            RuleResult::Requirement(r) => &r.rule.path,
            RuleResult::Proficiency(r) => &r.rule.path,
            RuleResult::Conditional(r) => &r.path,
        }
    }

    pub fn rank(&self) -> Fraction {
        match self {
            RuleResult::Course(r) => r.rank(),
            RuleResult::Count(r) => r.rank(),
            RuleResult::Query(r) => r.rank(),
            RuleResult::Requirement(r) => r.rank(),
            RuleResult::Proficiency(r) => r.rank(),
            RuleResult::Conditional(r) => r.rank(),
        }
    }

    pub fn max_rank(&self) -> Fraction {
        one()
    }

    pub fn status(&self) -> ResultStatus {
        match self {
            RuleResult::Course(r) => r.status(),
            RuleResult::Count(r) => r.status(),
            RuleResult::Query(r) => r.status(),
            RuleResult::Requirement(r) => r.status(),
            RuleResult::Proficiency(r) => r.status(),
            RuleResult::Conditional(r) => r.status(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status().is_passing()
    }

    pub fn claims(&self) -> Vec<&ClaimAttempt> {
        match self {
            RuleResult::Course(r) => r.claim.iter().collect(),
            RuleResult::Count(r) => r
                .items
                .iter()
                .flat_map(|item| match item {
                    CountItemResult::Audited(result) => result.claims(),
                    CountItemResult::Skipped(_) => vec![],
                })
                .collect(),
            RuleResult::Query(r) => r.claims.iter().collect(),
            RuleResult::Requirement(r) => {
                r.result.as_deref().map(RuleResult::claims).unwrap_or_default()
            }
            RuleResult::Proficiency(r) => {
                r.course.as_deref().map(RuleResult::claims).unwrap_or_default()
            }
            RuleResult::Conditional(r) => {
                r.branch.as_deref().map(RuleResult::claims).unwrap_or_default()
            }
        }
    }

    /// Clbids successfully claimed anywhere in this subtree.
    pub fn matched_clbids(&self) -> BTreeSet<String> {
        self.claims()
            .into_iter()
            .filter(|attempt| !attempt.failed)
            .map(|attempt| attempt.claim.clbid.clone())
            .collect()
    }

    /// Verify `rank <= max_rank` for every node in the tree.
    pub fn check_invariants(&self) -> areaudit_core::Result<()> {
        if self.rank() > self.max_rank() {
            return Err(AuditError::invariant(
                self.path(),
                format!("rank {} exceeds max_rank {}", self.rank(), self.max_rank()),
            ));
        }

        match self {
            RuleResult::Course(_) => Ok(()),
            RuleResult::Count(r) => {
                for item in &r.items {
                    if let CountItemResult::Audited(result) = item {
                        result.check_invariants()?;
                    }
                }
                Ok(())
            }
            RuleResult::Query(_) => Ok(()),
            RuleResult::Requirement(r) => {
                r.result.as_deref().map_or(Ok(()), RuleResult::check_invariants)
            }
            RuleResult::Proficiency(r) => {
                r.course.as_deref().map_or(Ok(()), RuleResult::check_invariants)
            }
            RuleResult::Conditional(r) => {
                r.branch.as_deref().map_or(Ok(()), RuleResult::check_invariants)
            }
        }
    }

    fn base_json(&self, kind: &str) -> serde_json::Map<String, Json> {
        let mut obj = serde_json::Map::new();
        obj.insert("path".into(), json!(self.path().segments()));
        obj.insert("type".into(), json!(kind));
        obj.insert("status".into(), json!(self.status().as_str()));
        obj.insert("rank".into(), json!(self.rank().to_string()));
        obj.insert("max_rank".into(), json!(self.max_rank().to_string()));
        obj.insert("ok".into(), json!(self.is_ok()));
        obj
    }

    pub fn to_json(&self) -> Json {
        match self {
            RuleResult::Course(r) => {
                let mut obj = self.base_json("course");
                obj.insert("course".into(), json!(r.rule.reference()));
                obj.insert(
                    "claimed".into(),
                    json!(r.course.as_ref().map(|c| c.clbid.clone())),
                );
                obj.insert(
                    "claims".into(),
                    Json::Array(r.claim.iter().map(ClaimAttempt::to_json).collect()),
                );
                obj.insert("overridden".into(), json!(r.overridden));
                Json::Object(obj)
            }
            RuleResult::Count(r) => {
                let mut obj = self.base_json("count");
                obj.insert("count".into(), json!(r.count));
                obj.insert("at_most".into(), json!(r.at_most));
                obj.insert(
                    "items".into(),
                    Json::Array(
                        r.items
                            .iter()
                            .map(|item| match item {
                                CountItemResult::Audited(result) => result.to_json(),
                                CountItemResult::Skipped(rule) => json!({
                                    "path": rule.path().segments(),
                                    "type": rule_type_name(rule),
                                    "status": ResultStatus::Empty.as_str(),
                                    "rank": "0",
                                    "max_rank": "1",
                                    "ok": false,
                                }),
                            })
                            .collect(),
                    ),
                );
                obj.insert(
                    "audit".into(),
                    Json::Array(r.audit_results.iter().map(ResolvedAssertion::to_json).collect()),
                );
                obj.insert("overridden".into(), json!(r.overridden));
                Json::Object(obj)
            }
            RuleResult::Query(r) => {
                let mut obj = self.base_json("query");
                obj.insert("source".into(), json!(r.rule.source.as_str()));
                obj.insert(
                    "claims".into(),
                    Json::Array(r.claims.iter().map(ClaimAttempt::to_json).collect()),
                );
                obj.insert(
                    "failures".into(),
                    Json::Array(
                        r.claims
                            .iter()
                            .filter(|c| c.failed)
                            .map(ClaimAttempt::to_json)
                            .collect(),
                    ),
                );
                obj.insert(
                    "matched".into(),
                    json!(r.successful.iter().map(|c| c.clbid.clone()).collect::<Vec<_>>()),
                );
                obj.insert(
                    "assertions".into(),
                    Json::Array(r.resolved.iter().map(ResolvedAssertion::to_json).collect()),
                );
                obj.insert("overridden".into(), json!(r.overridden));
                Json::Object(obj)
            }
            RuleResult::Requirement(r) => {
                let mut obj = self.base_json("requirement");
                obj.insert("name".into(), json!(r.rule.name));
                obj.insert("message".into(), json!(r.rule.message));
                obj.insert(
                    "audited_by".into(),
                    json!(r.rule.audited_by.map(|a| a.as_str())),
                );
                obj.insert("contract".into(), json!(r.rule.is_contract));
                obj.insert(
                    "result".into(),
                    r.result.as_deref().map(RuleResult::to_json).unwrap_or(Json::Null),
                );
                obj.insert("overridden".into(), json!(r.overridden));
                Json::Object(obj)
            }
            RuleResult::Proficiency(r) => {
                let mut obj = self.base_json("proficiency");
                obj.insert("proficiency".into(), json!(r.rule.proficiency));
                obj.insert("held".into(), json!(r.held));
                obj.insert(
                    "course".into(),
                    r.course.as_deref().map(RuleResult::to_json).unwrap_or(Json::Null),
                );
                Json::Object(obj)
            }
            RuleResult::Conditional(r) => {
                let mut obj = self.base_json("conditional");
                obj.insert("condition".into(), r.condition.to_json());
                obj.insert("taken".into(), json!(if r.taken_true { "then" } else { "else" }));
                obj.insert(
                    "result".into(),
                    r.branch.as_deref().map(RuleResult::to_json).unwrap_or(Json::Null),
                );
                Json::Object(obj)
            }
        }
    }
}

impl CourseResult {
    pub fn success(&self) -> bool {
        self.overridden || self.claim.as_ref().map(|a| !a.failed).unwrap_or(false)
    }

    fn rank(&self) -> Fraction {
        if self.success() {
            one()
        } else {
            zero()
        }
    }

    fn status(&self) -> ResultStatus {
        if self.overridden {
            return ResultStatus::Waived;
        }
        if !self.success() {
            return ResultStatus::Empty;
        }
        status_from_courses(self.course.iter())
    }
}

impl CountResult {
    fn audited(&self) -> impl Iterator<Item = &RuleResult> {
        self.items.iter().filter_map(|item| match item {
            CountItemResult::Audited(result) => Some(result),
            CountItemResult::Skipped(_) => None,
        })
    }

    fn audits_pass(&self) -> bool {
        self.audit_results.iter().all(|a| a.result)
    }

    pub fn passed(&self) -> bool {
        let ok = self.audited().filter(|r| r.is_ok()).count();
        ok >= self.count && self.audits_pass()
    }

    fn rank(&self) -> Fraction {
        if self.overridden {
            return one();
        }

        let denominator = self.count + self.audit_results.len();
        if denominator == 0 {
            return one();
        }

        let target = Fraction::from(self.count as i64);
        let child_sum: Fraction = self.audited().map(RuleResult::rank).sum();
        // extra passes beyond the target never inflate the rank
        let child_part = child_sum.min(target);
        let audit_part: Fraction = self.audit_results.iter().map(ResolvedAssertion::rank).sum();

        (child_part + audit_part) / Fraction::from(denominator as i64)
    }

    fn status(&self) -> ResultStatus {
        if self.overridden {
            return ResultStatus::Waived;
        }

        if self.passed() {
            // the target-many best children are the contributors
            let mut ok_statuses: Vec<ResultStatus> =
                self.audited().filter(|r| r.is_ok()).map(|r| r.status()).collect();
            ok_statuses.sort();
            return ResultStatus::worst(ok_statuses.into_iter().take(self.count.max(1)));
        }

        let any_progress = self.audited().any(|r| r.rank() > zero());
        if any_progress {
            ResultStatus::NeedsMoreItems
        } else {
            ResultStatus::Empty
        }
    }
}

impl QueryResult {
    pub fn passed(&self) -> bool {
        if self.overridden || self.resolved.is_empty() {
            return true;
        }
        match self.rule.mode {
            AssertionMode::All => self.resolved.iter().all(|a| a.result),
            AssertionMode::Any => self.resolved.iter().any(|a| a.result),
        }
    }

    fn rank(&self) -> Fraction {
        if self.overridden || self.resolved.is_empty() {
            return one();
        }
        match self.rule.mode {
            AssertionMode::All => {
                let total: Fraction = self.resolved.iter().map(ResolvedAssertion::rank).sum();
                total / Fraction::from(self.resolved.len() as i64)
            }
            AssertionMode::Any => self
                .resolved
                .iter()
                .map(ResolvedAssertion::rank)
                .max()
                .unwrap_or_else(zero),
        }
    }

    fn assertion_status(&self, resolved: &ResolvedAssertion) -> ResultStatus {
        if resolved.result {
            let contributing = self
                .successful
                .iter()
                .filter(|c| resolved.resolved_clbids.contains(&c.clbid));
            status_from_courses(contributing)
        } else if resolved.resolved_clbids.is_empty() {
            ResultStatus::Empty
        } else {
            ResultStatus::NeedsMoreItems
        }
    }

    fn status(&self) -> ResultStatus {
        if self.overridden {
            return ResultStatus::Waived;
        }
        if self.resolved.is_empty() {
            return ResultStatus::Pass;
        }

        let statuses = self.resolved.iter().map(|a| self.assertion_status(a));
        match self.rule.mode {
            AssertionMode::All => ResultStatus::worst(statuses),
            AssertionMode::Any => statuses.min().unwrap_or(ResultStatus::Empty),
        }
    }
}

impl RequirementResult {
    pub fn waived(&self) -> bool {
        self.overridden || self.rule.audited_by.is_some()
    }

    fn rank(&self) -> Fraction {
        if self.waived() {
            return one();
        }
        self.result.as_deref().map(RuleResult::rank).unwrap_or_else(zero)
    }

    fn status(&self) -> ResultStatus {
        if self.waived() {
            return ResultStatus::Waived;
        }
        self.result
            .as_deref()
            .map(RuleResult::status)
            .unwrap_or(ResultStatus::Empty)
    }
}

impl ProficiencyResult {
    fn waived(&self) -> bool {
        self.held || self.overridden
    }

    fn rank(&self) -> Fraction {
        if self.waived() {
            return one();
        }
        self.course.as_deref().map(RuleResult::rank).unwrap_or_else(zero)
    }

    fn status(&self) -> ResultStatus {
        if self.waived() {
            return ResultStatus::Waived;
        }
        self.course
            .as_deref()
            .map(RuleResult::status)
            .unwrap_or(ResultStatus::Empty)
    }
}

impl ConditionalResult {
    fn rank(&self) -> Fraction {
        match &self.branch {
            Some(result) => result.rank(),
            // a missing else-branch is a waived pass
            None => one(),
        }
    }

    fn status(&self) -> ResultStatus {
        if self.overridden {
            return ResultStatus::Waived;
        }
        match &self.branch {
            Some(result) => result.status(),
            None => ResultStatus::Waived,
        }
    }
}

fn rule_type_name(rule: &Rule) -> &'static str {
    match rule {
        Rule::Course(_) => "course",
        Rule::Count(_) => "count",
        Rule::Query(_) => "query",
        Rule::Requirement(_) => "requirement",
        Rule::Proficiency(_) => "proficiency",
        Rule::Conditional(_) => "conditional",
    }
}
