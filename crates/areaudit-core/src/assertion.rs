//! Aggregate assertions over selected course sets.
//!
//! An assertion is `command(source) op value`, e.g.
//! `{"sum(credits)": {"$gte": 6}}`. Resolving an assertion records the
//! reduced value and the contributing items without touching any ledger.

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::constants::Constants;
use crate::course::{AreaPointer, CourseInstance};
use crate::error::{AuditError, Result};
use crate::operator::{apply_operator, Operator, Value};
use crate::path::RulePath;
use crate::predicate::{Predicate, PredicateClause};
use crate::{decimal_to_fraction, Fraction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionCommand {
    Count,
    Sum,
    Minimum,
    Maximum,
    Stored,
}

impl AssertionCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            AssertionCommand::Count => "count",
            AssertionCommand::Sum => "sum",
            AssertionCommand::Minimum => "minimum",
            AssertionCommand::Maximum => "maximum",
            AssertionCommand::Stored => "stored",
        }
    }
}

impl FromStr for AssertionCommand {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(AssertionCommand::Count),
            "sum" => Ok(AssertionCommand::Sum),
            "minimum" => Ok(AssertionCommand::Minimum),
            "maximum" => Ok(AssertionCommand::Maximum),
            "stored" => Ok(AssertionCommand::Stored),
            _ => Err(AuditError::data(format!("unknown assertion command {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assertion {
    pub command: AssertionCommand,
    pub source: String,
    pub operator: Operator,
    pub compare_to: Value,
    pub compare_to_verbatim: Value,
    pub at_most: bool,
    pub where_clause: Option<Predicate>,
    pub message: Option<String>,
    pub path: RulePath,
}

/// An assertion or a conditional pair of assertions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnyAssertion {
    Single(Assertion),
    Conditional {
        condition: Predicate,
        when_true: Box<Assertion>,
        when_false: Option<Box<Assertion>>,
    },
}

/// An assertion that has been evaluated against a candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAssertion {
    pub assertion: Assertion,
    pub reduced: Value,
    pub resolved_clbids: Vec<String>,
    pub result: bool,
}

fn assertion_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(count|sum|minimum|maximum|stored)\((.+)\)$").unwrap())
}

impl Assertion {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<Assertion> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let (key, captures) = obj
            .keys()
            .find_map(|k| assertion_key_regex().captures(k).map(|c| (k.clone(), c)))
            .ok_or_else(|| {
                AuditError::specification(path, format!("no command(source) key in {data}"))
            })?;

        let allowed = ["where", "message", "name"];
        for k in obj.keys() {
            if *k != key && !allowed.contains(&k.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {k:?} in assertion"),
                ));
            }
        }

        let command: AssertionCommand = captures[1]
            .parse()
            .map_err(|_| AuditError::specification(path, format!("bad command in {key:?}")))?;
        let source = captures[2].to_string();
        validate_source(command, &source, path)?;

        let clause = PredicateClause::load(&key, &obj[&key], c, path)?;

        let where_clause = obj
            .get("where")
            .map(|w| Predicate::load(w, c, path))
            .transpose()?;

        Ok(Assertion {
            command,
            source,
            operator: clause.operator,
            compare_to: clause.expected,
            compare_to_verbatim: clause.expected_verbatim,
            at_most: clause.at_most,
            where_clause,
            message: obj.get("message").and_then(Json::as_str).map(str::to_string),
            path: path.clone(),
        })
    }

    /// Resolve against a candidate course set. Pure; records what was
    /// examined without mutating anything.
    pub fn evaluate(&self, courses: &[CourseInstance]) -> ResolvedAssertion {
        let filtered: Vec<&CourseInstance> = courses
            .iter()
            .filter(|c| self.where_clause.as_ref().map_or(true, |w| w.apply(*c)))
            .collect();

        let (reduced, resolved_clbids) = self.reduce(&filtered);
        let result = apply_operator(&reduced, self.operator, &self.compare_to);

        ResolvedAssertion {
            assertion: self.clone(),
            reduced,
            resolved_clbids,
            result,
        }
    }

    fn reduce(&self, filtered: &[&CourseInstance]) -> (Value, Vec<String>) {
        let all_clbids = || filtered.iter().map(|c| c.clbid.clone()).collect::<Vec<_>>();

        match (self.command, self.source.as_str()) {
            (AssertionCommand::Count, "courses") => {
                let distinct: BTreeSet<&str> = filtered.iter().map(|c| c.clbid.as_str()).collect();
                (Value::Int(distinct.len() as i64), all_clbids())
            }
            (AssertionCommand::Count, "terms" | "semesters") => {
                let distinct: BTreeSet<(i64, i64)> =
                    filtered.iter().map(|c| (c.year, c.term)).collect();
                (Value::Int(distinct.len() as i64), all_clbids())
            }
            (AssertionCommand::Sum, "credits") => {
                let total: Decimal = filtered.iter().map(|c| c.credits).sum();
                (Value::Decimal(total), all_clbids())
            }
            (AssertionCommand::Sum, "grades") => {
                let total: Decimal = filtered.iter().map(|c| c.grade_points).sum();
                (Value::Decimal(total), all_clbids())
            }
            (AssertionCommand::Minimum | AssertionCommand::Maximum, source) => {
                self.reduce_extremum(filtered, source)
            }
            (AssertionCommand::Stored, _) => {
                tracing::warn!(path = %self.path, "stored-value lookup without a saved context");
                (Value::Int(0), vec![])
            }
            (command, source) => {
                tracing::warn!(
                    path = %self.path,
                    "cannot reduce {}({source}) over a course set",
                    command.as_str(),
                );
                (Value::Int(0), vec![])
            }
        }
    }

    fn reduce_extremum(&self, filtered: &[&CourseInstance], source: &str) -> (Value, Vec<String>) {
        let keyed: Vec<(Decimal, &CourseInstance)> = filtered
            .iter()
            .filter_map(|c| {
                let key = match source {
                    "grades" => c.grade_points,
                    "credits" => c.credits,
                    "terms" | "semesters" => Decimal::from(c.year * 10 + c.term),
                    _ => return None,
                };
                Some((key, *c))
            })
            .collect();

        let extremum = match self.command {
            AssertionCommand::Minimum => keyed.iter().map(|(k, _)| *k).min(),
            _ => keyed.iter().map(|(k, _)| *k).max(),
        };

        match extremum {
            Some(value) => {
                let contributors = keyed
                    .iter()
                    .filter(|(k, _)| *k == value)
                    .map(|(_, c)| c.clbid.clone())
                    .collect();
                (Value::Decimal(value), contributors)
            }
            None => (Value::Int(0), vec![]),
        }
    }

    /// Resolve against a set of declared areas (`from: areas` queries).
    pub fn evaluate_areas(&self, areas: &[AreaPointer]) -> ResolvedAssertion {
        let filtered: Vec<&AreaPointer> = areas
            .iter()
            .filter(|a| self.where_clause.as_ref().map_or(true, |w| w.apply(*a)))
            .collect();

        let reduced = match (self.command, self.source.as_str()) {
            (AssertionCommand::Count, "areas") => Value::Int(filtered.len() as i64),
            _ => {
                tracing::warn!(path = %self.path, "only count(areas) applies to an area set");
                Value::Int(0)
            }
        };
        let result = apply_operator(&reduced, self.operator, &self.compare_to);

        ResolvedAssertion {
            assertion: self.clone(),
            reduced,
            resolved_clbids: filtered.iter().map(|a| a.code.clone()).collect(),
            result,
        }
    }

    /// Candidate cardinalities consistent with this assertion, when it
    /// bounds the size of a course selection at all.
    pub fn input_size_range(&self, maximum: usize) -> Option<Vec<usize>> {
        if self.command != AssertionCommand::Count || self.source != "courses" {
            return None;
        }

        let clause = PredicateClause {
            key: "count".into(),
            operator: self.operator,
            expected: self.compare_to.clone(),
            expected_verbatim: self.compare_to_verbatim.clone(),
            at_most: self.at_most,
        };
        clause.input_size_range(maximum)
    }

    pub fn to_json(&self) -> Json {
        let mut op = Map::new();
        op.insert(self.operator.to_string(), verbatim_json(&self.compare_to_verbatim));
        if self.at_most {
            op.insert("at_most".into(), Json::Bool(true));
        }

        let mut obj = Map::new();
        obj.insert(
            format!("{}({})", self.command.as_str(), self.source),
            Json::Object(op),
        );
        if let Some(w) = &self.where_clause {
            obj.insert("where".into(), w.to_json());
        }
        if let Some(m) = &self.message {
            obj.insert("message".into(), json!(m));
        }
        Json::Object(obj)
    }
}

impl AnyAssertion {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<AnyAssertion> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        if let Some(condition) = obj.get("$if") {
            let when_true = obj.get("$then").ok_or_else(|| {
                AuditError::specification(path, "conditional assertion is missing $then")
            })?;
            let when_false = obj
                .get("$else")
                .map(|e| Assertion::load(e, c, path).map(Box::new))
                .transpose()?;
            return Ok(AnyAssertion::Conditional {
                condition: Predicate::load(condition, c, path)?,
                when_true: Box::new(Assertion::load(when_true, c, path)?),
                when_false,
            });
        }

        Ok(AnyAssertion::Single(Assertion::load(data, c, path)?))
    }

    /// Resolve against a candidate set. `None` means the assertion was
    /// vacuous for this candidate (an untaken conditional branch).
    pub fn resolve(&self, courses: &[CourseInstance]) -> Option<ResolvedAssertion> {
        match self {
            AnyAssertion::Single(a) => Some(a.evaluate(courses)),
            AnyAssertion::Conditional {
                condition,
                when_true,
                when_false,
            } => {
                // the condition holds when any candidate matches it
                if courses.iter().any(|c| condition.apply(c)) {
                    Some(when_true.evaluate(courses))
                } else {
                    when_false.as_ref().map(|a| a.evaluate(courses))
                }
            }
        }
    }

    pub fn input_size_range(&self, maximum: usize) -> Option<Vec<usize>> {
        match self {
            AnyAssertion::Single(a) => a.input_size_range(maximum),
            AnyAssertion::Conditional { .. } => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            AnyAssertion::Single(a) => a.to_json(),
            AnyAssertion::Conditional {
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
        }
    }
}

impl ResolvedAssertion {
    /// Progress toward this assertion: 1 when it holds, otherwise the
    /// observed fraction of the expected quantity, clamped to [0, 1].
    pub fn rank(&self) -> Fraction {
        if self.result {
            return Fraction::new(1, 1);
        }

        let observed = match &self.reduced {
            Value::Int(n) => Fraction::from(*n),
            Value::Decimal(d) => decimal_to_fraction(*d),
            _ => return Fraction::new(0, 1),
        };
        let expected = match &self.assertion.compare_to {
            Value::Int(n) => Fraction::from(*n),
            Value::Decimal(d) => decimal_to_fraction(*d),
            _ => return Fraction::new(0, 1),
        };

        if expected <= Fraction::new(0, 1)
            || !matches!(
                self.assertion.operator,
                Operator::EqualTo | Operator::GreaterThan | Operator::GreaterThanOrEqualTo
            )
        {
            return Fraction::new(0, 1);
        }

        (observed / expected).min(Fraction::new(1, 1)).max(Fraction::new(0, 1))
    }

    pub fn to_json(&self) -> Json {
        json!({
            "assertion": self.assertion.to_json(),
            "reduced": self.reduced.to_string(),
            "resolved_items": self.resolved_clbids,
            "result": self.result,
            "rank": self.rank().to_string(),
        })
    }
}

fn validate_source(command: AssertionCommand, source: &str, path: &RulePath) -> Result<()> {
    let ok = match command {
        AssertionCommand::Count => matches!(
            source,
            "courses" | "areas" | "performances" | "terms" | "semesters"
        ),
        AssertionCommand::Sum => matches!(source, "grades" | "credits"),
        AssertionCommand::Minimum | AssertionCommand::Maximum => {
            matches!(source, "terms" | "semesters" | "grades" | "credits")
        }
        AssertionCommand::Stored => true,
    };

    if ok {
        Ok(())
    } else {
        Err(AuditError::specification(
            path,
            format!("cannot {}({source})", command.as_str()),
        ))
    }
}

fn verbatim_json(value: &Value) -> Json {
    match value {
        Value::String(s) => json!(s),
        Value::Int(n) => json!(n),
        Value::Decimal(d) => json!(d.to_string()),
        Value::Bool(b) => json!(b),
        Value::GradeOption(g) => json!(g.as_str()),
        Value::List(items) => Json::Array(items.iter().map(verbatim_json).collect()),
    }
}
