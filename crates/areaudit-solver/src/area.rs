//! The area of study: the loaded specification plus the audit entry points.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use areaudit_core::{
    AreaKind, AuditError, Constants, CourseInstance, LimitSet, PredicateClause, Result,
    ResultStatus, RuleException, RulePath, Student,
};

use crate::context::{AuditContext, AuditFacts, SolveContext};
use crate::result::{CountItemResult, CountResult, RequirementResult, RuleResult};
use crate::rule::{RequirementRule, Rule};
use crate::solution::Solution;
use crate::solve::find_best_solution;

#[derive(Debug, Clone)]
pub struct AreaOfStudy {
    pub name: String,
    pub kind: String,
    pub code: String,
    pub degree: Option<String>,
    pub dept: Option<String>,
    pub limit: LimitSet,
    pub result: Rule,
    pub multicountable: Arc<Vec<Vec<PredicateClause>>>,
    pub path: RulePath,
}

impl AreaOfStudy {
    pub fn load(
        spec: &Json,
        c: &Constants,
        areas: &[areaudit_core::AreaPointer],
    ) -> Result<AreaOfStudy> {
        let root = RulePath::root();
        let obj = spec.as_object().ok_or_else(|| {
            AuditError::specification(&root, "expected the area specification to be a mapping")
        })?;

        let allowed = [
            "name",
            "type",
            "code",
            "degree",
            "emphases",
            "result",
            "requirements",
            "limit",
            "attributes",
        ];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    &root,
                    format!("unknown key {key:?} at the specification root"),
                ));
            }
        }

        let code = obj
            .get("code")
            .and_then(Json::as_str)
            .unwrap_or("<null>")
            .to_string();
        let dept = areas
            .iter()
            .find(|p| p.code == code)
            .and_then(|p| p.dept.clone());

        let empty = Map::new();
        let requirements = obj
            .get("requirements")
            .and_then(Json::as_object)
            .unwrap_or(&empty);

        let result_data = obj
            .get("result")
            .ok_or_else(|| AuditError::specification(&root, "area specification has no result"))?;
        let mut result = Rule::load(result_data, requirements, c, &root)?;

        // every named requirement must be reachable from the result tree
        let used: BTreeSet<String> = result.requirement_names().into_iter().collect();
        for (name, definition) in requirements {
            let conditional = definition
                .as_object()
                .map(|d| d.contains_key("if"))
                .unwrap_or(false);
            if !conditional && !used.contains(name) {
                return Err(AuditError::specification(
                    &root,
                    format!("requirement {name:?} is never referenced"),
                ));
            }
        }

        // declared emphases join the root count as extra requirements
        let declared: BTreeSet<&str> = areas
            .iter()
            .filter(|p| p.kind == AreaKind::Emphasis)
            .map(|p| p.code.as_str())
            .collect();
        if let Some(emphases) = obj.get("emphases").and_then(Json::as_object) {
            for (ecode, espec) in emphases {
                let emphasis = AreaOfStudy::load(espec, c, &[])?;
                if !declared.contains(ecode.as_str()) {
                    continue;
                }

                let Rule::Count(count) = &mut result else {
                    warn!(code = %ecode, "declared emphasis needs a count at the result root; skipped");
                    continue;
                };

                let epath = root
                    .child(".count")
                    .child(&format!("%Emphasis: {}", emphasis.name));
                let eobj = espec.as_object().ok_or_else(|| {
                    AuditError::specification(&epath, "expected the emphasis to be a mapping")
                })?;
                let echildren = eobj
                    .get("requirements")
                    .and_then(Json::as_object)
                    .unwrap_or(&empty);
                let eresult = eobj.get("result").ok_or_else(|| {
                    AuditError::specification(&epath, "emphasis specification has no result")
                })?;
                let erule = Rule::load(eresult, echildren, c, &epath.child(".result"))?;

                count.items.push(Rule::Requirement(RequirementRule {
                    name: format!("Emphasis: {}", emphasis.name),
                    message: None,
                    result: Some(Box::new(erule)),
                    audited_by: None,
                    is_contract: false,
                    optional: false,
                    path: epath,
                }));
                count.count += 1;
            }
        }

        let limit = LimitSet::load(obj.get("limit"), c, &root)?;

        let mut multicountable: Vec<Vec<PredicateClause>> = Vec::new();
        if let Some(groups) = obj
            .get("attributes")
            .and_then(Json::as_object)
            .and_then(|attrs| attrs.get("multicountable"))
            .and_then(Json::as_array)
        {
            for group in groups {
                let clauses = group.as_array().ok_or_else(|| {
                    AuditError::specification(&root, "multicountable groups must be lists")
                })?;
                let mut loaded = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let clause_obj = clause.as_object().ok_or_else(|| {
                        AuditError::specification(&root, "multicountable entries must be mappings")
                    })?;
                    let (key, value) = if let Some(v) = clause_obj.get("course") {
                        ("course", v)
                    } else if let Some(v) = clause_obj.get("attributes") {
                        ("attributes", v)
                    } else {
                        return Err(AuditError::specification(
                            &root,
                            format!("invalid multicountable clause {clause}"),
                        ));
                    };
                    loaded.push(PredicateClause::load(key, value, c, &root)?);
                }
                multicountable.push(loaded);
            }
        }

        Ok(AreaOfStudy {
            name: obj
                .get("name")
                .and_then(Json::as_str)
                .unwrap_or("Test")
                .to_string(),
            kind: obj
                .get("type")
                .and_then(Json::as_str)
                .unwrap_or("test")
                .to_string(),
            code,
            degree: obj.get("degree").and_then(Json::as_str).map(str::to_string),
            dept,
            limit,
            result,
            multicountable: Arc::new(multicountable),
            path: root,
        })
    }

    pub fn facts_for(&self, student: &Student) -> AuditFacts {
        AuditFacts {
            degree: student.degree().or_else(|| self.degree.clone()),
            area_codes: student.areas.iter().map(|a| a.code.clone()).collect(),
            area_kinds: student
                .areas
                .iter()
                .map(|a| a.kind.as_str().to_string())
                .collect(),
            matriculation_year: student.matriculation,
        }
    }

    pub fn solve_context(&self, student: &Student, limited: Vec<CourseInstance>) -> SolveContext {
        SolveContext::new(
            limited,
            student.areas.clone(),
            student.proficiencies.clone(),
            student.exceptions.clone(),
            self.facts_for(student),
        )
    }

    pub fn forced_clbids(student: &Student) -> BTreeSet<String> {
        student
            .exceptions
            .iter()
            .filter_map(|e| match e {
                RuleException::Insert {
                    clbid,
                    forced: true,
                    ..
                } => Some(clbid.clone()),
                _ => None,
            })
            .collect()
    }

    /// Total candidate count across every limited transcript; sizes the
    /// progress display and never commits claims.
    pub fn estimate(&self, student: &Student) -> u64 {
        let forced = Self::forced_clbids(student);
        let mut total: u64 = 0;
        for limited in self.limit.limited_transcripts(&student.courses, &forced) {
            let ctx = self.solve_context(student, limited);
            total = total.saturating_add(self.result.estimate(&ctx));
        }
        total
    }

    /// Audit one candidate solution into an area result.
    pub fn audit_solution(
        &self,
        solution: &Solution,
        ctx: &mut AuditContext,
    ) -> Result<AreaResult> {
        let mut result = solution.audit(ctx);

        if self.kind == "major" {
            let common = self.audit_common_major_requirements(&result, ctx)?;
            if let RuleResult::Count(count) = &mut result {
                count.items.push(CountItemResult::Audited(common));
                count.count += 1;
            } else {
                warn!(code = %self.code, "major audits expect a count at the result root; common requirements skipped");
            }
        }

        result.check_invariants()?;
        let gpa = self.gpa(&result, ctx);

        Ok(AreaResult {
            name: self.name.clone(),
            kind: self.kind.clone(),
            code: self.code.clone(),
            degree: self.degree.clone(),
            result,
            gpa,
        })
    }

    /// The all-college requirements every major carries: C-or-better
    /// credits, the S/U cap, and credits outside the major.
    fn audit_common_major_requirements(
        &self,
        result: &RuleResult,
        ctx: &AuditContext,
    ) -> Result<RuleResult> {
        let claimed_clbids = result.matched_clbids();
        let claimed: Vec<CourseInstance> = ctx
            .solve
            .transcript()
            .iter()
            .filter(|c| claimed_clbids.contains(&c.clbid))
            .cloned()
            .collect();
        let claimed_ctx = ctx.solve.with_transcript(claimed);

        let (c_or_better, s_u_credits, outside_the_major) = self.prepare_common_rules(ctx)?;

        let common_path = RulePath::root().child("%Common Requirements");
        let missing = |name: &str| {
            AuditError::invariant(&common_path, format!("no solutions found for {name}"))
        };

        let mut items: Vec<RuleResult> = Vec::with_capacity(3);
        items.push(
            find_best_solution(&c_or_better, &claimed_ctx, self.multicountable.clone())
                .ok_or_else(|| missing("the C-or-higher rule"))?,
        );
        items.push(
            find_best_solution(&s_u_credits, &claimed_ctx, self.multicountable.clone())
                .ok_or_else(|| missing("the S/U credits rule"))?,
        );
        if let Some(outside) = outside_the_major {
            items.push(
                find_best_solution(&outside, &ctx.solve, self.multicountable.clone())
                    .ok_or_else(|| missing("the outside-the-major rule"))?,
            );
        }

        let count_result = RuleResult::Count(CountResult {
            count: items.len(),
            at_most: false,
            items: items.into_iter().map(CountItemResult::Audited).collect(),
            audit_results: vec![],
            overridden: false,
            path: common_path.child(".count"),
        });

        let label = match &self.degree {
            Some(degree) => format!("Common {degree} Major Requirements"),
            None => "Common Major Requirements".to_string(),
        };

        Ok(RuleResult::Requirement(RequirementResult {
            rule: RequirementRule {
                name: label,
                message: None,
                result: None,
                audited_by: None,
                is_contract: false,
                optional: false,
                path: common_path,
            },
            overridden: false,
            result: Some(Box::new(count_result)),
        }))
    }

    fn prepare_common_rules(&self, ctx: &AuditContext) -> Result<(Rule, Rule, Option<Rule>)> {
        let c = Constants::default();
        let base = RulePath::root().child("%Common Requirements").child(".count");

        let other_area_codes: BTreeSet<&str> = ctx
            .solve
            .areas()
            .iter()
            .filter(|p| p.code != self.code)
            .map(|p| p.code.as_str())
            .collect();

        let studio_art = "140";
        let art_history = "135";
        let is_history_and_studio = (self.code == studio_art
            && other_area_codes.contains(art_history))
            || (self.code == art_history && other_area_codes.contains(studio_art));

        let (credits_outside_major, credits_message) = if is_history_and_studio {
            (
                18,
                " Students who double-major in studio art and art history are required to \
                 complete at least 18 full-course credits outside the SIS 'ART' subject code.",
            )
        } else {
            (21, "")
        };

        let is_bm_major = self.degree.as_deref() == Some("B.M.");

        let c_or_better = Rule::load(
            &json!({"requirement": "Credits at a C or higher"}),
            &to_map(json!({
                "Credits at a C or higher": {
                    "message": "Of the credits counting toward the minimum requirements for a \
                                major, a total of six (6.00) must be completed with a grade of C \
                                or higher.",
                    "result": {
                        "from": "courses",
                        "allow_claimed": true,
                        "claim": false,
                        "where": {
                            "$and": [
                                {"grade": {"$gte": "C"}},
                                {"credits": {"$gt": 0}},
                                {"is_in_progress": {"$eq": false}},
                            ],
                        },
                        "assert": {"sum(credits)": {"$gte": 6}},
                    },
                },
            })),
            &c,
            &base.index(0),
        )?;

        let s_u_detail = if is_bm_major {
            json!({
                "message": "No courses in a B.M Music major may be taken S/U.",
                "result": {
                    "from": "courses",
                    "allow_claimed": true,
                    "claim": false,
                    "where": {"s/u": {"$eq": true}},
                    "assert": {"count(courses)": {"$eq": 0}},
                },
            })
        } else {
            json!({
                "message": "Only one full-course equivalent (1.00-credit course) taken S/U may \
                            count toward the minimum requirements for a major.",
                "result": {
                    "from": "courses",
                    "allow_claimed": true,
                    "claim": false,
                    "where": {
                        "$and": [
                            {"s/u": {"$eq": true}},
                            {"credits": {"$eq": 1}},
                        ],
                    },
                    "assert": {"count(courses)": {"$lte": 1}},
                },
            })
        };

        let s_u_credits = Rule::load(
            &json!({"requirement": "Credits taken S/U"}),
            &to_map(json!({"Credits taken S/U": s_u_detail})),
            &c,
            &base.index(1),
        )?;

        let outside_the_major = if is_bm_major {
            None
        } else {
            let dept_label = self.dept.clone().unwrap_or_else(|| "None".to_string());
            let message = format!(
                "21 total credits must be completed outside of the SIS 'subject' code of the \
                 major ({dept_label}).{credits_message}"
            );
            let detail = match &self.dept {
                None => json!({
                    "message": message,
                    "registrar_audited": true,
                }),
                Some(dept) => json!({
                    "message": message,
                    "result": {
                        "from": "courses",
                        "where": {
                            "$and": [
                                {"subject": {"$neq": dept}},
                                {"subject": {"$neq": "REG"}},
                            ],
                        },
                        "allow_claimed": true,
                        "claim": false,
                        "assert": {"sum(credits)": {"$gte": credits_outside_major}},
                    },
                }),
            };
            Some(Rule::load(
                &json!({"requirement": "Credits outside the major"}),
                &to_map(json!({"Credits outside the major": detail})),
                &c,
                &base.index(2),
            )?)
        };

        Ok((c_or_better, s_u_credits, outside_the_major))
    }

    fn gpa(&self, result: &RuleResult, ctx: &AuditContext) -> Decimal {
        let matched = result.matched_clbids();
        let courses: Vec<&CourseInstance> = ctx
            .solve
            .transcript()
            .iter()
            .filter(|c| self.kind == "degree" || matched.contains(&c.clbid))
            .collect();
        grade_point_average(&courses)
    }

    /// Serialise back into the loadable specification shape.
    pub fn to_spec_json(&self) -> Json {
        let mut requirements = Map::new();
        let result = self.result.to_spec_json(&mut requirements);

        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        obj.insert("type".into(), json!(self.kind));
        obj.insert("code".into(), json!(self.code));
        if let Some(degree) = &self.degree {
            obj.insert("degree".into(), json!(degree));
        }
        obj.insert("result".into(), result);
        if !requirements.is_empty() {
            obj.insert("requirements".into(), Json::Object(requirements));
        }
        if self.limit.has_limits() {
            obj.insert("limit".into(), self.limit.to_json());
        }
        if !self.multicountable.is_empty() {
            let groups: Vec<Json> = self
                .multicountable
                .iter()
                .map(|group| Json::Array(group.iter().map(PredicateClause::to_json).collect()))
                .collect();
            obj.insert("attributes".into(), json!({"multicountable": groups}));
        }
        Json::Object(obj)
    }
}

/// The audited area: the best result plus the headline numbers.
#[derive(Debug, Clone)]
pub struct AreaResult {
    pub name: String,
    pub kind: String,
    pub code: String,
    pub degree: Option<String>,
    pub result: RuleResult,
    pub gpa: Decimal,
}

impl AreaResult {
    pub fn rank(&self) -> areaudit_core::Fraction {
        self.result.rank()
    }

    pub fn max_rank(&self) -> areaudit_core::Fraction {
        self.result.max_rank()
    }

    pub fn status(&self) -> ResultStatus {
        self.result.status()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn claimed_clbids(&self) -> BTreeSet<String> {
        self.result.matched_clbids()
    }

    pub fn to_json(&self) -> Json {
        json!({
            "name": self.name,
            "type": self.kind,
            "code": self.code,
            "degree": self.degree,
            "status": self.status().as_str(),
            "ok": self.is_ok(),
            "rank": self.rank().to_string(),
            "max_rank": self.max_rank().to_string(),
            "gpa": self.gpa.to_string(),
            "claimed": self.claimed_clbids().into_iter().collect::<Vec<_>>(),
            "result": self.result.to_json(),
        })
    }
}

fn to_map(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        other => {
            debug!("expected a mapping, got {other}");
            Map::new()
        }
    }
}

/// Credit-weighted grade-point average over graded, in-GPA courses.
fn grade_point_average(courses: &[&CourseInstance]) -> Decimal {
    let mut points = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for course in courses.iter().filter(|c| c.is_in_gpa) {
        points += course.grade_points * course.credits;
        credits += course.credits;
    }
    if credits.is_zero() {
        return Decimal::new(0, 2);
    }
    (points / credits).round_dp(2)
}
