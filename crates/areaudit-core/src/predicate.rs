//! Boolean predicates over course (and area) attributes.
//!
//! The specification shape is `{key: {"$op": value}}`, with `$and`/`$or`/
//! `$not` compounds and a `$if`/`$then`/`$else` conditional. Evaluation is
//! pure: applying a predicate twice to the same record yields the same
//! answer.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value as Json};
use std::str::FromStr;

use crate::constants::Constants;
use crate::course::{grade_points_for, Clausable, GradeOption};
use crate::error::{AuditError, Result};
use crate::operator::{apply_operator, Operator, Value};
use crate::path::RulePath;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    If {
        condition: Box<Predicate>,
        when_true: Box<Predicate>,
        when_false: Option<Box<Predicate>>,
    },
    Clause(PredicateClause),
}

/// A single `key op expected` comparison. The `at_most` flag is part of the
/// clause's identity: two otherwise-equal clauses that differ in `at_most`
/// are distinct claimants under the multi-count policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateClause {
    pub key: String,
    pub operator: Operator,
    pub expected: Value,
    pub expected_verbatim: Value,
    pub at_most: bool,
}

impl Predicate {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<Predicate> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        if let Some(children) = obj.get("$and") {
            expect_single_key(obj, path)?;
            return Ok(Predicate::And(load_list(children, c, path)?));
        }
        if let Some(children) = obj.get("$or") {
            expect_single_key(obj, path)?;
            return Ok(Predicate::Or(load_list(children, c, path)?));
        }
        if let Some(inner) = obj.get("$not") {
            expect_single_key(obj, path)?;
            return Ok(Predicate::Not(Box::new(Predicate::load(inner, c, path)?)));
        }
        if let Some(condition) = obj.get("$if") {
            let when_true = obj.get("$then").ok_or_else(|| {
                AuditError::specification(path, "conditional predicate is missing $then")
            })?;
            let when_false = obj
                .get("$else")
                .map(|e| Predicate::load(e, c, path).map(Box::new))
                .transpose()?;
            return Ok(Predicate::If {
                condition: Box::new(Predicate::load(condition, c, path)?),
                when_true: Box::new(Predicate::load(when_true, c, path)?),
                when_false,
            });
        }

        let mut clauses = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            clauses.push(Predicate::Clause(PredicateClause::load(key, value, c, path)?));
        }

        match clauses.len() {
            0 => Err(AuditError::specification(path, "empty predicate")),
            1 => Ok(clauses.remove(0)),
            _ => Ok(Predicate::And(clauses)),
        }
    }

    pub fn apply(&self, record: &dyn Clausable) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(|c| c.apply(record)),
            Predicate::Or(children) => children.iter().any(|c| c.apply(record)),
            Predicate::Not(inner) => !inner.apply(record),
            Predicate::If {
                condition,
                when_true,
                when_false,
            } => {
                if condition.apply(record) {
                    when_true.apply(record)
                } else {
                    // a missing else is a pass-through
                    when_false.as_ref().map_or(true, |p| p.apply(record))
                }
            }
            Predicate::Clause(clause) => clause.apply(record),
        }
    }

    /// Answers "am I a subset of `other`" for the multi-count policy.
    /// Compounds are subsets when any child is.
    pub fn is_subset_of(&self, other: &PredicateClause) -> bool {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(|c| c.is_subset_of(other))
            }
            Predicate::Not(_) | Predicate::If { .. } => false,
            Predicate::Clause(clause) => clause.is_subset_of(other),
        }
    }

    /// Serialise back into the specification shape.
    pub fn to_json(&self) -> Json {
        match self {
            Predicate::And(children) => {
                json!({"$and": children.iter().map(Predicate::to_json).collect::<Vec<_>>()})
            }
            Predicate::Or(children) => {
                json!({"$or": children.iter().map(Predicate::to_json).collect::<Vec<_>>()})
            }
            Predicate::Not(inner) => json!({"$not": inner.to_json()}),
            Predicate::If {
                condition,
                when_true,
                when_false,
            } => {
                let mut obj = Map::new();
                obj.insert("$if".into(), condition.to_json());
                obj.insert("$then".into(), when_true.to_json());
                if let Some(e) = when_false {
                    obj.insert("$else".into(), e.to_json());
                }
                Json::Object(obj)
            }
            Predicate::Clause(clause) => clause.to_json(),
        }
    }
}

impl PredicateClause {
    pub fn load(key: &str, value: &Json, c: &Constants, path: &RulePath) -> Result<PredicateClause> {
        let obj = value.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {value} to be a mapping"))
        })?;

        let operator_tokens: Vec<&String> = obj.keys().filter(|k| k.starts_with('$')).collect();
        if operator_tokens.len() != 1 {
            return Err(AuditError::specification(
                path,
                format!("expected exactly one operator in {value}"),
            ));
        }
        let token = operator_tokens[0].clone();
        let operator = Operator::from_str(&token)
            .map_err(|_| AuditError::specification(path, format!("unknown operator token {token:?}")))?;

        let at_most = match obj.get("at_most") {
            None => false,
            Some(Json::Bool(b)) => *b,
            Some(other) => {
                return Err(AuditError::specification(
                    path,
                    format!("expected at_most to be a boolean, got {other}"),
                ))
            }
        };

        // singular/plural aliases
        let key = match key {
            "subjects" => "subject",
            "attribute" => "attributes",
            "gereq" => "gereqs",
            other => other,
        };

        let raw = &obj[&token];
        let expected_verbatim = json_to_value(raw, c, path)?;
        let expected = coerce_expected(key, &expected_verbatim, path)?;

        Ok(PredicateClause {
            key: key.to_string(),
            operator,
            expected,
            expected_verbatim,
            at_most,
        })
    }

    pub fn apply(&self, record: &dyn Clausable) -> bool {
        match record.clause_value(&self.key) {
            Some(actual) => apply_operator(&actual, self.operator, &self.expected),
            // a record without the attribute satisfies only negative operators
            None => matches!(self.operator, Operator::NotEqualTo | Operator::NotIn),
        }
    }

    pub fn is_subset_of(&self, other: &PredicateClause) -> bool {
        if self.key != other.key {
            return false;
        }

        if self.operator == Operator::EqualTo && other.operator == Operator::In {
            if let Value::List(options) = &other.expected {
                return options.iter().any(|v| v.loose_eq(&self.expected));
            }
        }

        self.expected == other.expected
    }

    /// Every subset cardinality consistent with this clause, bounded by
    /// `maximum`. Only meaningful for integer expectations; `None` means the
    /// clause does not bound cardinality.
    pub fn input_size_range(&self, maximum: usize) -> Option<Vec<usize>> {
        let expected = usize::try_from(self.expected.as_int()?).ok()?;

        let sizes = match self.operator {
            Operator::EqualTo => vec![expected],
            Operator::GreaterThanOrEqualTo if self.at_most => vec![expected],
            Operator::GreaterThanOrEqualTo => (expected..=maximum.max(expected)).collect(),
            Operator::GreaterThan => (expected + 1..=maximum.max(expected + 1)).collect(),
            Operator::LessThan => (0..expected).collect(),
            Operator::LessThanOrEqualTo => (0..=expected).collect(),
            Operator::NotEqualTo => (0..expected).chain(expected + 1..=maximum).collect(),
            Operator::In | Operator::NotIn => return None,
        };
        Some(sizes)
    }

    pub fn to_json(&self) -> Json {
        let mut op = Map::new();
        op.insert(self.operator.to_string(), value_to_json(&self.expected_verbatim));
        if self.at_most {
            op.insert("at_most".into(), Json::Bool(true));
        }
        let mut obj = Map::new();
        obj.insert(self.key.clone(), Json::Object(op));
        Json::Object(obj)
    }
}

fn expect_single_key(obj: &Map<String, Json>, path: &RulePath) -> Result<()> {
    if obj.len() != 1 {
        return Err(AuditError::specification(
            path,
            "compound predicates must be the only key in their mapping",
        ));
    }
    Ok(())
}

fn load_list(data: &Json, c: &Constants, path: &RulePath) -> Result<Vec<Predicate>> {
    let items = data.as_array().ok_or_else(|| {
        AuditError::specification(path, format!("expected {data} to be a list of predicates"))
    })?;
    items.iter().map(|d| Predicate::load(d, c, path)).collect()
}

fn json_to_value(raw: &Json, c: &Constants, path: &RulePath) -> Result<Value> {
    match raw {
        Json::String(s) => Ok(c.resolve(s)),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                Decimal::from_str(&n.to_string())
                    .map(Value::Decimal)
                    .map_err(|_| AuditError::specification(path, format!("unparseable number {n}")))
            }
        }
        Json::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|v| json_to_value(v, c, path))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Err(AuditError::specification(
            path,
            format!("unsupported expected value {other}"),
        )),
    }
}

/// Key-directed coercion: grades become canonical grade points, credits
/// become decimals, grade types become their enum.
fn coerce_expected(key: &str, verbatim: &Value, path: &RulePath) -> Result<Value> {
    match key {
        "grade" => match verbatim {
            Value::String(letter) => grade_points_for(letter)
                .map(Value::Decimal)
                .ok_or_else(|| AuditError::specification(path, format!("unknown grade {letter:?}"))),
            Value::Int(n) => Ok(Value::Decimal(Decimal::from(*n))),
            other => Ok(other.clone()),
        },
        "grade_type" | "grade_option" => match verbatim {
            Value::String(s) => s
                .parse::<GradeOption>()
                .map(Value::GradeOption)
                .map_err(|_| AuditError::specification(path, format!("unknown grade type {s:?}"))),
            other => Ok(other.clone()),
        },
        "credits" => match verbatim {
            Value::Int(n) => Ok(Value::Decimal(Decimal::from(*n))),
            other => Ok(other.clone()),
        },
        _ => Ok(verbatim.clone()),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::String(s) => json!(s),
        Value::Int(n) => json!(n),
        Value::Decimal(d) => json!(d.to_string()),
        Value::Bool(b) => json!(b),
        Value::GradeOption(g) => json!(g.as_str()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::CourseInstance;
    use serde_json::json;

    fn course(spec: Json) -> CourseInstance {
        CourseInstance::load(&spec).unwrap()
    }

    fn load(data: Json) -> Predicate {
        Predicate::load(&data, &Constants::default(), &RulePath::root()).unwrap()
    }

    #[test]
    fn single_clause_applies() {
        let p = load(json!({"subject": {"$eq": "CSCI"}}));
        let yes = course(json!({"clbid": "1", "course": "CSCI 121", "credits": 1}));
        let no = course(json!({"clbid": "2", "course": "MATH 101", "credits": 1}));
        assert!(p.apply(&yes));
        assert!(!p.apply(&no));
    }

    #[test]
    fn multiple_keys_collapse_into_and() {
        let p = load(json!({"subject": {"$eq": "ART"}, "level": {"$gte": 200}}));
        match &p {
            Predicate::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected an and-predicate, got {other:?}"),
        }
        let yes = course(json!({"clbid": "1", "course": "ART 232", "credits": 1}));
        assert!(p.apply(&yes));
    }

    #[test]
    fn grade_strings_become_grade_points() {
        let p = load(json!({"grade": {"$gte": "C"}}));
        let b_plus = course(json!({"clbid": "1", "course": "X 1", "credits": 1, "grade": "B+"}));
        let d = course(json!({"clbid": "2", "course": "X 2", "credits": 1, "grade": "D"}));
        assert!(p.apply(&b_plus));
        assert!(!p.apply(&d));
    }

    #[test]
    fn conditional_with_missing_else_is_vacuously_true() {
        let p = load(json!({
            "$if": {"subject": {"$eq": "MUSIC"}},
            "$then": {"level": {"$gte": 200}},
        }));
        let non_music = course(json!({"clbid": "1", "course": "ART 101", "credits": 1}));
        let low_music = course(json!({"clbid": "2", "course": "MUSIC 101", "credits": 1}));
        assert!(p.apply(&non_music));
        assert!(!p.apply(&low_music));
    }

    #[test]
    fn key_aliases_normalise() {
        let p = load(json!({"gereq": {"$eq": "WRI"}}));
        match p {
            Predicate::Clause(c) => assert_eq!(c.key, "gereqs"),
            other => panic!("expected a clause, got {other:?}"),
        }
    }

    #[test]
    fn input_size_ranges() {
        let clause = |data: Json| match load(data) {
            Predicate::Clause(c) => c,
            other => panic!("expected a clause, got {other:?}"),
        };

        assert_eq!(
            clause(json!({"count": {"$gte": 4, "at_most": true}})).input_size_range(10),
            Some(vec![4])
        );
        assert_eq!(
            clause(json!({"count": {"$lte": 3}})).input_size_range(10),
            Some(vec![0, 1, 2, 3])
        );
        assert_eq!(
            clause(json!({"count": {"$gte": 2}})).input_size_range(4),
            Some(vec![2, 3, 4])
        );
        assert_eq!(
            clause(json!({"count": {"$eq": 1}})).input_size_range(4),
            Some(vec![1])
        );
        assert_eq!(
            clause(json!({"count": {"$neq": 2}})).input_size_range(4),
            Some(vec![0, 1, 3, 4])
        );
        assert_eq!(clause(json!({"subject": {"$eq": "X"}})).input_size_range(4), None);
    }

    #[test]
    fn subset_checks_for_the_multicount_policy() {
        let claimant = load(json!({"attributes": {"$eq": "music_elective"}}));
        let member_eq = match load(json!({"attributes": {"$eq": "music_elective"}})) {
            Predicate::Clause(c) => c,
            _ => unreachable!(),
        };
        let member_in = match load(json!({"attributes": {"$in": ["music_elective", "music_theory"]}})) {
            Predicate::Clause(c) => c,
            _ => unreachable!(),
        };
        assert!(claimant.is_subset_of(&member_eq));
        assert!(claimant.is_subset_of(&member_in));
    }

    #[test]
    fn at_most_is_part_of_clause_identity() {
        let a = load(json!({"count": {"$gte": 4, "at_most": true}}));
        let b = load(json!({"count": {"$gte": 4}}));
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_json() {
        let original = json!({
            "$or": [
                {"subject": {"$eq": "CSCI"}},
                {"$and": [{"grade": {"$gte": "C"}}, {"credits": {"$gt": 0}}]},
            ],
        });
        let loaded = load(original);
        let reloaded = load(loaded.to_json());
        assert_eq!(loaded, reloaded);
    }

    #[test]
    fn unknown_operator_is_a_specification_error() {
        let err = Predicate::load(
            &json!({"subject": {"$matches": "CS.*"}}),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let p = load(json!({"subject": {"$eq": "CSCI"}}));
        let c = course(json!({"clbid": "1", "course": "CSCI 121", "credits": 1}));
        assert_eq!(p.apply(&c), p.apply(&c));
    }
}
