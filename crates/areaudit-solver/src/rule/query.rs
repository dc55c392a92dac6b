//! Query rules: a filtered selection from a source, gated by assertions.

use itertools::Itertools;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

use areaudit_core::{
    ncr, AnyAssertion, AuditError, Constants, CourseInstance, LimitSet, Predicate, Result, RulePath,
};

use crate::context::SolveContext;
use crate::solution::{QuerySolution, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Courses,
    Claimed,
    Areas,
}

impl QuerySource {
    pub fn as_str(self) -> &'static str {
        match self {
            QuerySource::Courses => "courses",
            QuerySource::Claimed => "claimed",
            QuerySource::Areas => "areas",
        }
    }
}

impl FromStr for QuerySource {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "courses" => Ok(QuerySource::Courses),
            "claimed" => Ok(QuerySource::Claimed),
            "areas" => Ok(QuerySource::Areas),
            _ => Err(AuditError::data(format!("unknown query source {s:?}"))),
        }
    }
}

/// How multiple assertions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionMode {
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRule {
    pub source: QuerySource,
    pub where_clause: Option<Predicate>,
    pub limit: LimitSet,
    pub assertions: Vec<AnyAssertion>,
    pub mode: AssertionMode,
    pub allow_claimed: bool,
    pub attempt_claims: bool,
    pub path: RulePath,
}

impl QueryRule {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<QueryRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = ["from", "where", "limit", "claim", "allow_claimed", "assert", "all", "any"];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in query rule"),
                ));
            }
        }

        let source: QuerySource = obj
            .get("from")
            .and_then(Json::as_str)
            .ok_or_else(|| AuditError::specification(path, "query rule requires from:"))?
            .parse()
            .map_err(|e: AuditError| AuditError::specification(path, e.to_string()))?;

        let where_clause = obj
            .get("where")
            .map(|w| Predicate::load(w, c, &path.child(".where")))
            .transpose()?;

        let limit = LimitSet::load(obj.get("limit"), c, &path.child(".limit"))?;

        let assertion_path = path.child(".assertions");
        let (assertions, mode) = if let Some(single) = obj.get("assert") {
            (
                vec![AnyAssertion::load(single, c, &assertion_path.index(0))?],
                AssertionMode::All,
            )
        } else if let Some(list) = obj.get("all") {
            (load_assertions(list, c, &assertion_path)?, AssertionMode::All)
        } else if let Some(list) = obj.get("any") {
            (load_assertions(list, c, &assertion_path)?, AssertionMode::Any)
        } else {
            return Err(AuditError::specification(
                path,
                "query rule requires assert:, all:, or any:",
            ));
        };

        Ok(QueryRule {
            source,
            where_clause,
            limit,
            assertions,
            mode,
            allow_claimed: obj
                .get("allow_claimed")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            attempt_claims: obj.get("claim").and_then(Json::as_bool).unwrap_or(true),
            path: path.clone(),
        })
    }

    /// Courses this query may draw from: the filtered transcript plus any
    /// insertion exceptions at this path, in deterministic order.
    pub fn matched_courses(&self, ctx: &SolveContext) -> Vec<CourseInstance> {
        let mut matched: Vec<CourseInstance> = ctx
            .transcript()
            .iter()
            .filter(|c| self.where_clause.as_ref().map_or(true, |w| w.apply(*c)))
            .cloned()
            .collect();

        for clbid in ctx.inserted_clbids(&self.path) {
            if matched.iter().any(|c| c.clbid == clbid) {
                continue;
            }
            if let Some(course) = ctx.find_course_by_clbid(clbid) {
                matched.push(course.clone());
            }
        }

        matched.sort_by_key(|c| c.sort_order());
        matched
    }

    /// Candidate subset cardinalities: the conjunction of every count-type
    /// assertion's `input_size_range`, descending. `None` means the whole
    /// matched set is the single candidate.
    fn candidate_sizes(&self, maximum: usize) -> Option<Vec<usize>> {
        let mut sizes: Option<BTreeSet<usize>> = None;
        for assertion in &self.assertions {
            if let Some(range) = assertion.input_size_range(maximum) {
                let range: BTreeSet<usize> = range.into_iter().collect();
                sizes = Some(match sizes {
                    None => range,
                    Some(existing) => existing.intersection(&range).copied().collect(),
                });
            }
        }
        sizes.map(|set| {
            set.into_iter()
                .filter(|size| *size <= maximum)
                .rev()
                .collect()
        })
    }

    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        // claimed/area sources resolve their records at audit time
        if self.source != QuerySource::Courses {
            return Box::new(std::iter::once(Solution::Query(QuerySolution {
                rule: self.clone(),
                courses: vec![],
            })));
        }

        let matched = self.matched_courses(ctx);
        let forced = ctx.forced_clbids();
        debug!(path = %self.path, matched = matched.len(), "query matched courses");

        let limited: Vec<Vec<CourseInstance>> = self
            .limit
            .limited_transcripts(&matched, &forced)
            .collect();

        Box::new(limited.into_iter().flat_map(move |transcript| {
            let candidates: Box<dyn Iterator<Item = Vec<CourseInstance>>> =
                match self.candidate_sizes(transcript.len()) {
                    None => Box::new(std::iter::once(transcript)),
                    // no consistent cardinality: one failing candidate, so
                    // the enclosing rule still sees this branch
                    Some(sizes) if sizes.is_empty() => Box::new(std::iter::once(transcript)),
                    Some(sizes) => Box::new(sizes.into_iter().flat_map(move |size| {
                        transcript.clone().into_iter().combinations(size)
                    })),
                };

            candidates.map(move |courses| {
                Solution::Query(QuerySolution {
                    rule: self.clone(),
                    courses,
                })
            })
        }))
    }

    pub fn estimate(&self, ctx: &SolveContext) -> u64 {
        if self.source != QuerySource::Courses {
            return 1;
        }

        let matched = self.matched_courses(ctx);
        let forced = ctx.forced_clbids();

        let mut total: u64 = 0;
        for transcript in self.limit.limited_transcripts(&matched, &forced) {
            total = total.saturating_add(match self.candidate_sizes(transcript.len()) {
                None => 1,
                Some(sizes) if sizes.is_empty() => 1,
                Some(sizes) => sizes
                    .into_iter()
                    .map(|k| ncr(transcript.len() as u64, k as u64))
                    .sum(),
            });
        }
        total
    }

    pub fn to_spec_json(&self) -> Json {
        let mut obj = Map::new();
        obj.insert("from".into(), json!(self.source.as_str()));
        if let Some(w) = &self.where_clause {
            obj.insert("where".into(), w.to_json());
        }
        if self.limit.has_limits() {
            obj.insert("limit".into(), self.limit.to_json());
        }
        if self.allow_claimed {
            obj.insert("allow_claimed".into(), json!(true));
        }
        if !self.attempt_claims {
            obj.insert("claim".into(), json!(false));
        }
        let assertions = Json::Array(self.assertions.iter().map(AnyAssertion::to_json).collect());
        match self.mode {
            AssertionMode::All => obj.insert("all".into(), assertions),
            AssertionMode::Any => obj.insert("any".into(), assertions),
        };
        Json::Object(obj)
    }
}

fn load_assertions(data: &Json, c: &Constants, path: &RulePath) -> Result<Vec<AnyAssertion>> {
    let items = data.as_array().ok_or_else(|| {
        AuditError::specification(path, format!("expected {data} to be a list of assertions"))
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, a)| AnyAssertion::load(a, c, &path.index(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(data: Json) -> QueryRule {
        QueryRule::load(&data, &Constants::default(), &RulePath::root()).unwrap()
    }

    #[test]
    fn assert_all_any_select_the_mode() {
        let single = load(json!({"from": "courses", "assert": {"count(courses)": {"$gte": 1}}}));
        assert_eq!(single.mode, AssertionMode::All);
        assert_eq!(single.assertions.len(), 1);

        let any = load(json!({"from": "courses", "any": [
            {"count(courses)": {"$gte": 1}},
            {"sum(credits)": {"$gte": 2}},
        ]}));
        assert_eq!(any.mode, AssertionMode::Any);
        assert_eq!(any.assertions.len(), 2);
    }

    #[test]
    fn claim_false_disables_claim_attempts() {
        let rule = load(json!({
            "from": "courses", "claim": false, "allow_claimed": true,
            "assert": {"sum(credits)": {"$gte": 6}},
        }));
        assert!(!rule.attempt_claims);
        assert!(rule.allow_claimed);
    }

    #[test]
    fn candidate_sizes_come_from_count_assertions() {
        let rule = load(json!({
            "from": "courses",
            "assert": {"count(courses)": {"$gte": 2, "at_most": true}},
        }));
        assert_eq!(rule.candidate_sizes(5), Some(vec![2]));

        let sum = load(json!({"from": "courses", "assert": {"sum(credits)": {"$gte": 6}}}));
        assert_eq!(sum.candidate_sizes(5), None);
    }

    #[test]
    fn missing_assertions_are_a_specification_error() {
        let err = QueryRule::load(
            &json!({"from": "courses"}),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }

    #[test]
    fn unknown_source_is_a_specification_error() {
        let err = QueryRule::load(
            &json!({"from": "music performances", "assert": {"count(courses)": {"$gte": 1}}}),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }
}
