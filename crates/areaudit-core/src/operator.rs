//! Comparison operators and the mixed-type values they act on.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::course::GradeOption;
use crate::error::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    In,
    NotIn,
}

impl FromStr for Operator {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$eq" => Ok(Operator::EqualTo),
            "$neq" => Ok(Operator::NotEqualTo),
            "$lt" => Ok(Operator::LessThan),
            "$lte" => Ok(Operator::LessThanOrEqualTo),
            "$gt" => Ok(Operator::GreaterThan),
            "$gte" => Ok(Operator::GreaterThanOrEqualTo),
            "$in" => Ok(Operator::In),
            "$nin" => Ok(Operator::NotIn),
            _ => Err(AuditError::data(format!("unknown operator token {s:?}"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Operator::EqualTo => "$eq",
            Operator::NotEqualTo => "$neq",
            Operator::LessThan => "$lt",
            Operator::LessThanOrEqualTo => "$lte",
            Operator::GreaterThan => "$gt",
            Operator::GreaterThanOrEqualTo => "$gte",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
        };
        write!(f, "{token}")
    }
}

/// A comparable attribute value: course attributes, predicate expectations,
/// and assertion results all live in this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Decimal(Decimal),
    Bool(bool),
    GradeOption(GradeOption),
    List(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(n) => Some(Decimal::from(*n)),
            _ => None,
        }
    }

    /// Numeric-aware equality: `Int(2)` equals `Decimal(2.00)`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_decimal(), other.as_decimal()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => match (self.as_decimal(), other.as_decimal()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(items) => items.iter().any(|v| v.loose_eq(needle)),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::GradeOption(g) => write!(f, "{}", g.as_str()),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Apply an operator across mixed types: string equality, decimal
/// comparison, set membership, and set subset/superset when both sides are
/// collections.
pub fn apply_operator(lhs: &Value, op: Operator, rhs: &Value) -> bool {
    match op {
        Operator::EqualTo => match (lhs, rhs) {
            // "attributes = x" passes when any held attribute equals x
            (Value::List(_), _) if !matches!(rhs, Value::List(_)) => lhs.contains(rhs),
            (_, Value::List(_)) if !matches!(lhs, Value::List(_)) => rhs.contains(lhs),
            _ => lhs.loose_eq(rhs),
        },
        Operator::NotEqualTo => !apply_operator(lhs, Operator::EqualTo, rhs),
        Operator::In => match (lhs, rhs) {
            // both sides collections: subset
            (Value::List(items), Value::List(_)) => items.iter().all(|v| rhs.contains(v)),
            _ => rhs.contains(lhs),
        },
        Operator::NotIn => !apply_operator(lhs, Operator::In, rhs),
        Operator::LessThan => matches!(lhs.compare(rhs), Some(Ordering::Less)),
        Operator::LessThanOrEqualTo => {
            matches!(lhs.compare(rhs), Some(Ordering::Less | Ordering::Equal))
        }
        Operator::GreaterThan => matches!(lhs.compare(rhs), Some(Ordering::Greater)),
        Operator::GreaterThanOrEqualTo => {
            matches!(lhs.compare(rhs), Some(Ordering::Greater | Ordering::Equal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_tokens_round_trip() {
        for token in ["$eq", "$neq", "$lt", "$lte", "$gt", "$gte", "$in", "$nin"] {
            let op: Operator = token.parse().unwrap();
            assert_eq!(op.to_string(), token);
        }
        assert!("$between".parse::<Operator>().is_err());
    }

    #[test]
    fn decimal_and_int_compare_loosely() {
        let two = Value::Int(2);
        let two_decimal = Value::Decimal(Decimal::new(200, 2));
        assert!(apply_operator(&two, Operator::EqualTo, &two_decimal));
        assert!(apply_operator(
            &Value::Decimal(Decimal::new(35, 1)),
            Operator::GreaterThan,
            &Value::Int(3),
        ));
    }

    #[test]
    fn membership_on_either_side() {
        let attrs = Value::List(vec![Value::string("music_theory"), Value::string("fol_j")]);
        assert!(apply_operator(&attrs, Operator::EqualTo, &Value::string("fol_j")));
        assert!(apply_operator(&Value::string("fol_j"), Operator::In, &attrs));
        assert!(apply_operator(&Value::string("dance"), Operator::NotIn, &attrs));
    }

    #[test]
    fn subset_when_both_sides_are_lists() {
        let held = Value::List(vec![Value::string("a"), Value::string("b")]);
        let wanted = Value::List(vec![Value::string("a"), Value::string("b"), Value::string("c")]);
        assert!(apply_operator(&held, Operator::In, &wanted));
        assert!(!apply_operator(&wanted, Operator::In, &held));
    }

    #[test]
    fn incomparable_types_never_order() {
        assert!(!apply_operator(
            &Value::string("x"),
            Operator::LessThan,
            &Value::Int(3),
        ));
    }
}
