//! Transcript entries and declared-area pointers.
//!
//! `CourseInstance` is value-typed and immutable after load; the loader is
//! strict about the fields an audit cannot run without (spec/data errors are
//! fatal, per the error taxonomy).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::str::FromStr;

use crate::error::{AuditError, Result};
use crate::operator::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeOption {
    #[serde(rename = "grade")]
    Graded,
    #[serde(rename = "s/u")]
    SU,
    #[serde(rename = "p/n")]
    PassFail,
    #[serde(rename = "audit")]
    Audit,
    #[serde(rename = "no grade")]
    NoGrade,
}

impl GradeOption {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeOption::Graded => "grade",
            GradeOption::SU => "s/u",
            GradeOption::PassFail => "p/n",
            GradeOption::Audit => "audit",
            GradeOption::NoGrade => "no grade",
        }
    }
}

impl FromStr for GradeOption {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grade" | "graded" => Ok(GradeOption::Graded),
            "s/u" | "su" => Ok(GradeOption::SU),
            "p/n" | "pn" => Ok(GradeOption::PassFail),
            "audit" => Ok(GradeOption::Audit),
            "no grade" | "no-grade" => Ok(GradeOption::NoGrade),
            _ => Err(AuditError::data(format!("unknown grade option {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseSubType {
    Normal,
    Lab,
    Flac,
    Discussion,
    Seminar,
    Topic,
}

impl CourseSubType {
    pub fn as_str(self) -> &'static str {
        match self {
            CourseSubType::Normal => "normal",
            CourseSubType::Lab => "lab",
            CourseSubType::Flac => "flac",
            CourseSubType::Discussion => "discussion",
            CourseSubType::Seminar => "seminar",
            CourseSubType::Topic => "topic",
        }
    }
}

impl FromStr for CourseSubType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "normal" => Ok(CourseSubType::Normal),
            "lab" => Ok(CourseSubType::Lab),
            "flac" => Ok(CourseSubType::Flac),
            "discussion" => Ok(CourseSubType::Discussion),
            "seminar" => Ok(CourseSubType::Seminar),
            "topic" => Ok(CourseSubType::Topic),
            _ => Err(AuditError::data(format!("unknown course sub-type {s:?}"))),
        }
    }
}

/// Map a letter grade onto canonical grade points ("C" compares as 2.00).
pub fn grade_points_for(letter: &str) -> Option<Decimal> {
    let points = match letter {
        "A+" | "A" => Decimal::new(400, 2),
        "A-" => Decimal::new(370, 2),
        "B+" => Decimal::new(330, 2),
        "B" => Decimal::new(300, 2),
        "B-" => Decimal::new(270, 2),
        "C+" => Decimal::new(230, 2),
        "C" => Decimal::new(200, 2),
        "C-" => Decimal::new(170, 2),
        "D+" => Decimal::new(130, 2),
        "D" => Decimal::new(100, 2),
        "D-" => Decimal::new(70, 2),
        "F" => Decimal::new(0, 2),
        _ => return None,
    };
    Some(points)
}

/// Anything a predicate can be evaluated against.
pub trait Clausable {
    /// Look up an attribute by canonical key. `None` means "this record has
    /// no such attribute", which fails every comparison except `$neq`/`$nin`
    /// handled by the predicate layer.
    fn clause_value(&self, key: &str) -> Option<Value>;
}

/// A single transcript entry. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseInstance {
    pub clbid: String,
    pub crsid: String,
    pub subject: String,
    pub number: String,
    pub section: Option<String>,
    pub name: String,
    pub credits: Decimal,
    pub grade_code: Option<String>,
    pub grade_points: Decimal,
    pub grade_option: GradeOption,
    pub gereqs: Vec<String>,
    pub attributes: Vec<String>,
    pub year: i64,
    pub term: i64,
    pub sub_type: CourseSubType,
    pub institution: String,
    pub is_in_progress: bool,
    pub is_in_progress_this_term: bool,
    pub is_in_progress_in_future: bool,
    pub is_repeat: bool,
    pub is_in_gpa: bool,
    pub is_stolaf: bool,
}

impl CourseInstance {
    /// The canonical course code, `"SUBJ NUM"`.
    pub fn course(&self) -> String {
        format!("{} {}", self.subject, self.number)
    }

    pub fn course_with_term(&self) -> String {
        format!("{} {}-{}", self.course(), self.year, self.term)
    }

    /// Deterministic iteration key: `(year, term, course, clbid)`.
    pub fn sort_order(&self) -> (i64, i64, String, String) {
        (self.year, self.term, self.course(), self.clbid.clone())
    }

    /// Course level: `"251"` is level 200. Non-numeric numbers are level 0.
    pub fn level(&self) -> i64 {
        let digits: String = self.number.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<i64>().map(|n| n / 100 * 100).unwrap_or(0)
    }

    /// Load a transcript row. Missing required fields and unparseable
    /// grades are data errors, fatal to the audit.
    pub fn load(row: &Json) -> Result<CourseInstance> {
        let obj = row
            .as_object()
            .ok_or_else(|| AuditError::data(format!("expected a course row object, got {row}")))?;

        let clbid = get_string(obj, "clbid")
            .ok_or_else(|| AuditError::data("course row is missing its clbid"))?;

        let (subject, number) = match (get_string(obj, "subject"), get_string(obj, "number")) {
            (Some(s), Some(n)) => (s, n),
            _ => {
                let code = get_string(obj, "course").ok_or_else(|| {
                    AuditError::data(format!("course row {clbid} has neither subject/number nor course"))
                })?;
                split_course_code(&code)
                    .ok_or_else(|| AuditError::data(format!("unparseable course code {code:?}")))?
            }
        };

        let credits = obj
            .get("credits")
            .and_then(parse_decimal)
            .ok_or_else(|| AuditError::data(format!("course row {clbid} is missing credits")))?;

        let grade_code = get_string(obj, "grade");
        let grade_points = match (&grade_code, obj.get("grade_points").and_then(parse_decimal)) {
            (_, Some(points)) => points,
            (Some(letter), None) => grade_points_for(letter).ok_or_else(|| {
                AuditError::data(format!("unparseable grade {letter:?} on course row {clbid}"))
            })?,
            (None, None) => Decimal::ZERO,
        };

        let grade_option = match get_string(obj, "grade_option") {
            Some(raw) => raw.parse()?,
            None => GradeOption::Graded,
        };

        let sub_type = match get_string(obj, "type").or_else(|| get_string(obj, "sub_type")) {
            Some(raw) => raw.parse()?,
            None => CourseSubType::Normal,
        };

        Ok(CourseInstance {
            crsid: get_string(obj, "crsid").unwrap_or_default(),
            subject,
            number,
            section: get_string(obj, "section"),
            name: get_string(obj, "name").unwrap_or_else(|| String::from("")),
            credits,
            grade_code,
            grade_points,
            grade_option,
            gereqs: get_string_list(obj, "gereqs"),
            attributes: get_string_list(obj, "attributes"),
            year: obj.get("year").and_then(Json::as_i64).unwrap_or(0),
            term: obj.get("term").and_then(Json::as_i64).unwrap_or(0),
            sub_type,
            institution: get_string(obj, "institution")
                .unwrap_or_else(|| String::from("St. Olaf College")),
            is_in_progress: get_bool(obj, "is_in_progress"),
            is_in_progress_this_term: get_bool(obj, "is_in_progress_this_term"),
            is_in_progress_in_future: get_bool(obj, "is_in_progress_in_future"),
            is_repeat: get_bool(obj, "is_repeat"),
            is_in_gpa: obj.get("is_in_gpa").and_then(Json::as_bool).unwrap_or(true),
            is_stolaf: obj.get("is_stolaf").and_then(Json::as_bool).unwrap_or(true),
            clbid,
        })
    }
}

impl Clausable for CourseInstance {
    fn clause_value(&self, key: &str) -> Option<Value> {
        let value = match key {
            "course" => Value::string(self.course()),
            "crsid" => Value::string(&self.crsid),
            "clbid" => Value::string(&self.clbid),
            "subject" => Value::string(&self.subject),
            "number" => Value::string(&self.number),
            "section" => Value::string(self.section.clone()?),
            "name" => Value::string(&self.name),
            "credits" => Value::Decimal(self.credits),
            "grade" => Value::Decimal(self.grade_points),
            "grade_code" => Value::string(self.grade_code.clone()?),
            "grade_type" | "grade_option" => Value::GradeOption(self.grade_option),
            "s/u" => Value::Bool(self.grade_option == GradeOption::SU),
            "gereqs" => Value::List(self.gereqs.iter().map(Value::string).collect()),
            "attributes" => Value::List(self.attributes.iter().map(Value::string).collect()),
            "year" => Value::Int(self.year),
            "term" => Value::Int(self.term),
            "institution" => Value::string(&self.institution),
            "level" => Value::Int(self.level()),
            "type" => Value::string(self.sub_type.as_str()),
            "is_in_progress" => Value::Bool(self.is_in_progress),
            "is_in_progress_this_term" => Value::Bool(self.is_in_progress_this_term),
            "is_in_progress_in_future" => Value::Bool(self.is_in_progress_in_future),
            "is_repeat" => Value::Bool(self.is_repeat),
            "is_in_gpa" => Value::Bool(self.is_in_gpa),
            "is_stolaf" => Value::Bool(self.is_stolaf),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Degree,
    Major,
    Concentration,
    Emphasis,
}

impl AreaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AreaKind::Degree => "degree",
            AreaKind::Major => "major",
            AreaKind::Concentration => "concentration",
            AreaKind::Emphasis => "emphasis",
        }
    }
}

impl FromStr for AreaKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "degree" => Ok(AreaKind::Degree),
            "major" => Ok(AreaKind::Major),
            "concentration" => Ok(AreaKind::Concentration),
            "emphasis" => Ok(AreaKind::Emphasis),
            _ => Err(AuditError::data(format!("unknown area kind {s:?}"))),
        }
    }
}

/// A declared area (major/concentration/emphasis/degree) on the student's
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaPointer {
    pub code: String,
    pub kind: AreaKind,
    pub name: Option<String>,
    pub degree: Option<String>,
    pub dept: Option<String>,
}

impl AreaPointer {
    pub fn load(row: &Json) -> Result<AreaPointer> {
        let obj = row
            .as_object()
            .ok_or_else(|| AuditError::data(format!("expected an area pointer object, got {row}")))?;

        let code = get_string(obj, "code")
            .ok_or_else(|| AuditError::data("area pointer is missing its code"))?;
        let kind = get_string(obj, "kind")
            .or_else(|| get_string(obj, "type"))
            .ok_or_else(|| AuditError::data(format!("area pointer {code} is missing its kind")))?
            .parse()?;

        Ok(AreaPointer {
            code,
            kind,
            name: get_string(obj, "name"),
            degree: get_string(obj, "degree"),
            dept: get_string(obj, "dept"),
        })
    }
}

impl Clausable for AreaPointer {
    fn clause_value(&self, key: &str) -> Option<Value> {
        let value = match key {
            "code" => Value::string(&self.code),
            "type" | "kind" => Value::string(self.kind.as_str()),
            "name" => Value::string(self.name.clone()?),
            "degree" => Value::string(self.degree.clone()?),
            "dept" => Value::string(self.dept.clone()?),
            _ => return None,
        };
        Some(value)
    }
}

fn get_string(obj: &serde_json::Map<String, Json>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn get_string_list(obj: &serde_json::Map<String, Json>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Json::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn get_bool(obj: &serde_json::Map<String, Json>, key: &str) -> bool {
    obj.get(key).and_then(Json::as_bool).unwrap_or(false)
}

fn parse_decimal(value: &Json) -> Option<Decimal> {
    match value {
        Json::String(s) => Decimal::from_str(s).ok(),
        Json::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn split_course_code(code: &str) -> Option<(String, String)> {
    let mut parts = code.split_whitespace();
    let subject = parts.next()?.to_string();
    let number = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some((subject, number))
}
