//! Proficiency rules: pass if the proficiency is held, else fall back to a
//! nested course rule.

use serde_json::{json, Map, Value as Json};

use areaudit_core::{AuditError, Constants, Result, RulePath};

use crate::context::SolveContext;
use crate::rule::course::CourseRule;
use crate::solution::{ProficiencySolution, Solution};

#[derive(Debug, Clone, PartialEq)]
pub struct ProficiencyRule {
    pub proficiency: String,
    pub course: Option<CourseRule>,
    pub path: RulePath,
}

impl ProficiencyRule {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<ProficiencyRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = ["proficiency", "course"];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in proficiency rule"),
                ));
            }
        }

        let proficiency = obj
            .get("proficiency")
            .and_then(Json::as_str)
            .ok_or_else(|| AuditError::specification(path, "proficiency rule needs a name"))?
            .to_string();

        let course = obj
            .get("course")
            .map(|inner| CourseRule::load(inner, c, &path.child(".proficiency")))
            .transpose()?;

        Ok(ProficiencyRule {
            proficiency,
            course,
            path: path.clone(),
        })
    }

    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        let held = ctx.has_proficiency(&self.proficiency);

        if held || self.course.is_none() {
            return Box::new(std::iter::once(Solution::Proficiency(ProficiencySolution {
                rule: self.clone(),
                held,
                course: None,
            })));
        }

        let course_solutions = self
            .course
            .iter()
            .flat_map(|rule| rule.solutions(ctx))
            .collect::<Vec<_>>();
        Box::new(course_solutions.into_iter().map(move |solution| {
            Solution::Proficiency(ProficiencySolution {
                rule: self.clone(),
                held: false,
                course: Some(Box::new(solution)),
            })
        }))
    }

    pub fn estimate(&self, _ctx: &SolveContext) -> u64 {
        // held or not, a proficiency yields exactly one candidate
        1
    }

    pub fn to_spec_json(&self) -> Json {
        let mut obj = Map::new();
        obj.insert("proficiency".into(), json!(self.proficiency));
        if let Some(course) = &self.course {
            obj.insert("course".into(), course.to_spec_json());
        }
        Json::Object(obj)
    }
}
