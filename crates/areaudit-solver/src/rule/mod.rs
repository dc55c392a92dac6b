//! The rule tree.
//!
//! A rule node's shape selects its variant: `{course}` / `{crsid}`,
//! `{count, of}`, `{from}`, `{requirement}`, `{proficiency}`, `{if}`.
//! Malformed nodes are specification errors carrying the offending path.

pub mod conditional;
pub mod count;
pub mod course;
pub mod proficiency;
pub mod query;
pub mod requirement;

use serde_json::{Map, Value as Json};

use areaudit_core::{AuditError, Constants, CourseInstance, Result, RulePath};

use crate::context::SolveContext;
use crate::solution::Solution;

pub use conditional::ConditionalRule;
pub use count::CountRule;
pub use course::CourseRule;
pub use proficiency::ProficiencyRule;
pub use query::{AssertionMode, QueryRule, QuerySource};
pub use requirement::{AuditedBy, RequirementRule};

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Course(CourseRule),
    Count(CountRule),
    Query(QueryRule),
    Requirement(RequirementRule),
    Proficiency(ProficiencyRule),
    Conditional(ConditionalRule),
}

impl Rule {
    pub fn load(
        data: &Json,
        children: &Map<String, Json>,
        c: &Constants,
        path: &RulePath,
    ) -> Result<Rule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a rule mapping"))
        })?;

        if obj.contains_key("course") || obj.contains_key("crsid") || obj.contains_key("ap") {
            return Ok(Rule::Course(CourseRule::load(data, c, path)?));
        }
        if obj.contains_key("count") {
            return Ok(Rule::Count(CountRule::load(data, children, c, path)?));
        }
        if obj.contains_key("from") {
            return Ok(Rule::Query(QueryRule::load(data, c, path)?));
        }
        if obj.contains_key("requirement") {
            return Ok(Rule::Requirement(RequirementRule::load(data, children, c, path)?));
        }
        if obj.contains_key("proficiency") {
            return Ok(Rule::Proficiency(ProficiencyRule::load(data, c, path)?));
        }
        if obj.contains_key("if") {
            return Ok(Rule::Conditional(ConditionalRule::load(data, children, c, path)?));
        }

        Err(AuditError::specification(
            path,
            format!("unknown rule shape: {data}"),
        ))
    }

    pub fn path(&self) -> &RulePath {
        match self {
            Rule::Course(r) => &r.path,
            Rule::Count(r) => &r.path,
            Rule::Query(r) => &r.path,
            Rule::Requirement(r) => &r.path,
            Rule::Proficiency(r) => &r.path,
            Rule::Conditional(r) => &r.path,
        }
    }

    /// Lazily enumerate candidate solutions, likely-passing first.
    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        match self {
            Rule::Course(r) => r.solutions(ctx),
            Rule::Count(r) => r.solutions(ctx),
            Rule::Query(r) => r.solutions(ctx),
            Rule::Requirement(r) => r.solutions(ctx),
            Rule::Proficiency(r) => r.solutions(ctx),
            Rule::Conditional(r) => r.solutions(ctx),
        }
    }

    /// How many solutions this rule will yield; sizes progress reporting
    /// and never commits claims.
    pub fn estimate(&self, ctx: &SolveContext) -> u64 {
        match self {
            Rule::Course(_) => 1,
            Rule::Count(r) => r.estimate(ctx),
            Rule::Query(r) => r.estimate(ctx),
            Rule::Requirement(r) => r.estimate(ctx),
            Rule::Proficiency(r) => r.estimate(ctx),
            Rule::Conditional(r) => r.estimate(ctx),
        }
    }

    /// Transcript courses named directly by course rules in this subtree.
    pub fn get_required_courses(&self, ctx: &SolveContext) -> Vec<CourseInstance> {
        match self {
            Rule::Course(r) => r.find_course(ctx).into_iter().collect(),
            Rule::Count(r) => r
                .items
                .iter()
                .flat_map(|item| item.get_required_courses(ctx))
                .collect(),
            Rule::Query(_) => vec![],
            Rule::Requirement(r) => r
                .result
                .as_ref()
                .map(|inner| inner.get_required_courses(ctx))
                .unwrap_or_default(),
            Rule::Proficiency(r) => r
                .course
                .as_ref()
                .and_then(|inner| inner.find_course(ctx))
                .into_iter()
                .collect(),
            Rule::Conditional(r) => {
                let mut out = r.when_true.get_required_courses(ctx);
                if let Some(wf) = &r.when_false {
                    out.extend(wf.get_required_courses(ctx));
                }
                out
            }
        }
    }

    /// Names of every requirement referenced in this subtree; the area
    /// loader uses this to reject unused requirement definitions.
    pub fn requirement_names(&self) -> Vec<String> {
        match self {
            Rule::Course(_) | Rule::Query(_) | Rule::Proficiency(_) => vec![],
            Rule::Count(r) => r.items.iter().flat_map(Rule::requirement_names).collect(),
            Rule::Requirement(r) => {
                let mut names = vec![r.name.clone()];
                if let Some(inner) = &r.result {
                    names.extend(inner.requirement_names());
                }
                names
            }
            Rule::Conditional(r) => {
                let mut names = r.when_true.requirement_names();
                if let Some(wf) = &r.when_false {
                    names.extend(wf.requirement_names());
                }
                names
            }
        }
    }

    /// Serialise back into the loadable specification shape; requirement
    /// definitions are collected into `requirements`.
    pub fn to_spec_json(&self, requirements: &mut Map<String, Json>) -> Json {
        match self {
            Rule::Course(r) => r.to_spec_json(),
            Rule::Count(r) => r.to_spec_json(requirements),
            Rule::Query(r) => r.to_spec_json(),
            Rule::Requirement(r) => r.to_spec_json(requirements),
            Rule::Proficiency(r) => r.to_spec_json(),
            Rule::Conditional(r) => r.to_spec_json(requirements),
        }
    }
}
