//! A single required course (or crsid/AP reference).

use rust_decimal::Decimal;
use serde_json::{json, Map, Value as Json};
use std::str::FromStr;

use areaudit_core::{
    grade_points_for, AuditError, Constants, CourseInstance, Operator, Predicate, PredicateClause,
    Result, RulePath, Value,
};

use crate::context::SolveContext;
use crate::solution::{CourseSolution, Solution};

#[derive(Debug, Clone, PartialEq)]
pub struct CourseRule {
    pub course: Option<String>,
    pub crsid: Option<String>,
    pub clbid: Option<String>,
    pub ap: Option<String>,
    pub name: Option<String>,
    pub institution: Option<String>,
    pub grade: Option<Decimal>,
    pub hidden: bool,
    pub allow_claimed: bool,
    pub path: RulePath,
}

impl CourseRule {
    pub fn load(data: &Json, _c: &Constants, path: &RulePath) -> Result<CourseRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = [
            "course",
            "crsid",
            "clbid",
            "ap",
            "name",
            "institution",
            "grade",
            "hidden",
            "allow_claimed",
        ];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in course rule"),
                ));
            }
        }

        // a course reference written as {course: "crsid:0012345"}
        let (course, crsid_from_course) = match obj.get("course").and_then(Json::as_str) {
            Some(raw) => match raw.strip_prefix("crsid:") {
                Some(crsid) => (None, Some(crsid.to_string())),
                None => (Some(raw.to_string()), None),
            },
            None => (None, None),
        };

        let crsid = obj
            .get("crsid")
            .and_then(Json::as_str)
            .map(str::to_string)
            .or(crsid_from_course);
        let ap = obj.get("ap").and_then(Json::as_str).map(str::to_string);

        if course.is_none() && crsid.is_none() && ap.is_none() {
            return Err(AuditError::specification(
                path,
                "course rule names neither a course, a crsid, nor an AP exam",
            ));
        }

        let grade = obj
            .get("grade")
            .map(|g| match g {
                Json::String(letter) => grade_points_for(letter).ok_or_else(|| {
                    AuditError::specification(path, format!("unknown grade {letter:?}"))
                }),
                Json::Number(n) => Decimal::from_str(&n.to_string()).map_err(|_| {
                    AuditError::specification(path, format!("unparseable grade {n}"))
                }),
                other => Err(AuditError::specification(
                    path,
                    format!("unparseable grade {other}"),
                )),
            })
            .transpose()?;

        Ok(CourseRule {
            course,
            crsid,
            clbid: obj.get("clbid").and_then(Json::as_str).map(str::to_string),
            ap,
            name: obj.get("name").and_then(Json::as_str).map(str::to_string),
            institution: obj
                .get("institution")
                .and_then(Json::as_str)
                .map(str::to_string),
            grade,
            hidden: obj.get("hidden").and_then(Json::as_bool).unwrap_or(false),
            allow_claimed: obj
                .get("allow_claimed")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            path: path.clone(),
        })
    }

    /// Does this transcript entry satisfy the reference? (The grade minimum
    /// is checked at audit time, not here.)
    pub fn applies_to(&self, course: &CourseInstance) -> bool {
        if let Some(inst) = &self.institution {
            if course.institution != *inst {
                return false;
            }
        }
        if let Some(clbid) = &self.clbid {
            return course.clbid == *clbid;
        }
        if let Some(crsid) = &self.crsid {
            return course.crsid == *crsid;
        }
        if let Some(code) = &self.course {
            return course.course() == *code;
        }
        if let Some(ap) = &self.ap {
            return course.name == *ap;
        }
        false
    }

    /// First matching transcript entry, honoring insertion exceptions at
    /// this rule's path.
    pub fn find_course(&self, ctx: &SolveContext) -> Option<CourseInstance> {
        for clbid in ctx.inserted_clbids(&self.path) {
            if let Some(course) = ctx.find_course_by_clbid(clbid) {
                return Some(course.clone());
            }
        }
        ctx.transcript().iter().find(|c| self.applies_to(c)).cloned()
    }

    /// The clause identity this rule claims under; feeds the multi-count
    /// policy.
    pub fn as_claim_clause(&self) -> Predicate {
        let reference = self
            .course
            .clone()
            .or_else(|| self.crsid.clone())
            .or_else(|| self.ap.clone())
            .unwrap_or_default();
        Predicate::Clause(PredicateClause {
            key: "course".into(),
            operator: Operator::EqualTo,
            expected: Value::String(reference.clone()),
            expected_verbatim: Value::String(reference),
            at_most: false,
        })
    }

    pub fn reference(&self) -> String {
        self.course
            .clone()
            .or_else(|| self.crsid.clone())
            .or_else(|| self.ap.clone())
            .unwrap_or_default()
    }

    pub fn solutions<'r>(&'r self, _ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        Box::new(std::iter::once(Solution::Course(CourseSolution {
            rule: self.clone(),
        })))
    }

    pub fn to_spec_json(&self) -> Json {
        let mut obj = Map::new();
        if let Some(course) = &self.course {
            obj.insert("course".into(), json!(course));
        }
        if let Some(crsid) = &self.crsid {
            obj.insert("crsid".into(), json!(crsid));
        }
        if let Some(clbid) = &self.clbid {
            obj.insert("clbid".into(), json!(clbid));
        }
        if let Some(ap) = &self.ap {
            obj.insert("ap".into(), json!(ap));
        }
        if let Some(name) = &self.name {
            obj.insert("name".into(), json!(name));
        }
        if let Some(inst) = &self.institution {
            obj.insert("institution".into(), json!(inst));
        }
        if let Some(grade) = &self.grade {
            obj.insert("grade".into(), json!(grade.to_string()));
        }
        if self.hidden {
            obj.insert("hidden".into(), json!(true));
        }
        if self.allow_claimed {
            obj.insert("allow_claimed".into(), json!(true));
        }
        Json::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(data: Json) -> CourseRule {
        CourseRule::load(&data, &Constants::default(), &RulePath::root()).unwrap()
    }

    fn course(clbid: &str, code: &str, name: &str) -> CourseInstance {
        CourseInstance::load(&json!({
            "clbid": clbid, "course": code, "name": name, "credits": "1.00", "grade": "A",
        }))
        .unwrap()
    }

    #[test]
    fn matches_by_course_code() {
        let rule = load(json!({"course": "MATH 101"}));
        assert!(rule.applies_to(&course("1", "MATH 101", "Calc")));
        assert!(!rule.applies_to(&course("2", "MATH 102", "Calc II")));
    }

    #[test]
    fn crsid_prefix_in_the_course_key() {
        let rule = load(json!({"course": "crsid:0012345"}));
        assert_eq!(rule.crsid.as_deref(), Some("0012345"));
        assert!(rule.course.is_none());
    }

    #[test]
    fn ap_reference_matches_by_name() {
        let rule = load(json!({"ap": "AP Computer Science A"}));
        assert!(rule.applies_to(&course("1", "CSCI 0", "AP Computer Science A")));
    }

    #[test]
    fn grade_letters_resolve_to_points() {
        let rule = load(json!({"course": "MATH 101", "grade": "C"}));
        assert_eq!(rule.grade, Some(Decimal::new(200, 2)));
    }

    #[test]
    fn unknown_keys_are_specification_errors() {
        let err = CourseRule::load(
            &json!({"course": "MATH 101", "semester": "Fall"}),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }

    #[test]
    fn empty_reference_is_a_specification_error() {
        let err =
            CourseRule::load(&json!({"hidden": true}), &Constants::default(), &RulePath::root())
                .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }
}
