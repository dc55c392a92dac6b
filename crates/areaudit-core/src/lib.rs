//! areaudit-core - data model and leaf engines for the audit solver.
//!
//! Everything in this crate is either pure data (courses, predicates,
//! assertions, limits) or a small self-contained engine (the claim ledger,
//! the limited-transcript iterator). The recursive rule solver lives in
//! `areaudit-solver`.

pub mod assertion;
pub mod claim;
pub mod constants;
pub mod course;
pub mod error;
pub mod exception;
pub mod limit;
pub mod operator;
pub mod path;
pub mod predicate;
pub mod status;
pub mod student;

pub use assertion::{AnyAssertion, Assertion, AssertionCommand, ResolvedAssertion};
pub use claim::{Claim, ClaimAttempt, ClaimLedger};
pub use constants::Constants;
pub use course::{
    grade_points_for, AreaKind, AreaPointer, Clausable, CourseInstance, CourseSubType, GradeOption,
};
pub use error::{AuditError, Result};
pub use exception::RuleException;
pub use limit::{ncr, AtMostWhat, Limit, LimitSet};
pub use operator::{apply_operator, Operator, Value};
pub use path::RulePath;
pub use predicate::{Predicate, PredicateClause};
pub use status::ResultStatus;
pub use student::Student;

/// Exact fraction used for rank bookkeeping throughout the audit.
pub type Fraction = num_rational::Ratio<i64>;

/// Convert a decimal quantity (credits, grade points) into an exact fraction.
pub fn decimal_to_fraction(d: rust_decimal::Decimal) -> Fraction {
    let scale = d.scale();
    let mantissa = d.mantissa();
    let denom = 10i64.checked_pow(scale).unwrap_or(i64::MAX);
    Fraction::new(mantissa as i64, denom)
}
