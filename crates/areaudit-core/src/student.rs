//! The student record: transcript, declared areas, proficiencies, and
//! registrar exceptions.

use serde_json::Value as Json;
use std::collections::BTreeSet;
use tracing::debug;

use crate::course::{AreaPointer, CourseInstance, GradeOption};
use crate::error::{AuditError, Result};
use crate::exception::RuleException;

#[derive(Debug, Clone, Default)]
pub struct Student {
    pub stnum: String,
    pub matriculation: i64,
    pub courses: Vec<CourseInstance>,
    pub areas: Vec<AreaPointer>,
    pub proficiencies: BTreeSet<String>,
    pub exceptions: Vec<RuleException>,
}

impl Student {
    pub fn load(data: &Json) -> Result<Student> {
        let obj = data
            .as_object()
            .ok_or_else(|| AuditError::data(format!("expected a student object, got {data}")))?;

        // repeated courses stay in the transcript (some majors require
        // repeats for completion); audited courses never count
        let mut courses = Vec::new();
        if let Some(rows) = obj.get("courses").and_then(Json::as_array) {
            for row in rows {
                let course = CourseInstance::load(row)?;
                if course.grade_option == GradeOption::Audit {
                    debug!(clbid = %course.clbid, "dropping audit-graded course");
                    continue;
                }
                courses.push(course);
            }
        }

        let areas = obj
            .get("areas")
            .and_then(Json::as_array)
            .map(|rows| rows.iter().map(AreaPointer::load).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        let proficiencies = obj
            .get("proficiencies")
            .and_then(Json::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let exceptions = obj
            .get("exceptions")
            .and_then(Json::as_array)
            .map(|rows| rows.iter().map(RuleException::load).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Student {
            stnum: obj
                .get("stnum")
                .and_then(Json::as_str)
                .unwrap_or("000000")
                .to_string(),
            matriculation: obj.get("matriculation").and_then(Json::as_i64).unwrap_or(0),
            courses,
            areas,
            proficiencies,
            exceptions,
        })
    }

    /// The declared degree, when the record carries a degree pointer.
    pub fn degree(&self) -> Option<String> {
        self.areas
            .iter()
            .find(|a| a.kind == crate::course::AreaKind::Degree)
            .map(|a| a.name.clone().unwrap_or_else(|| a.code.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_drops_audited_courses_and_keeps_repeats() {
        let student = Student::load(&json!({
            "stnum": "123456",
            "matriculation": 2018,
            "courses": [
                {"clbid": "1", "course": "MATH 101", "credits": 1, "grade": "A"},
                {"clbid": "2", "course": "MATH 101", "credits": 1, "grade": "B", "is_repeat": true},
                {"clbid": "3", "course": "ART 101", "credits": 1, "grade_option": "audit"},
            ],
            "proficiencies": ["Keyboard Level IV"],
        }))
        .unwrap();

        assert_eq!(student.stnum, "123456");
        assert_eq!(student.courses.len(), 2);
        assert!(student.courses.iter().any(|c| c.is_repeat));
        assert!(student.proficiencies.contains("Keyboard Level IV"));
    }

    #[test]
    fn degree_comes_from_the_degree_pointer() {
        let student = Student::load(&json!({
            "areas": [
                {"code": "B.A.", "kind": "degree", "name": "B.A."},
                {"code": "140", "kind": "major"},
            ],
        }))
        .unwrap();
        assert_eq!(student.degree().as_deref(), Some("B.A."));
    }
}
