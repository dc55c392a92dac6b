//! Cross-module tests for areaudit-core: predicates over real course rows,
//! assertion resolution, the claim ledger, and the limit engine together.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use areaudit_core::{
    AnyAssertion, Assertion, ClaimLedger, Constants, CourseInstance, Fraction, LimitSet, Operator,
    Predicate, PredicateClause, RulePath, Student, Value,
};

fn course(data: serde_json::Value) -> CourseInstance {
    CourseInstance::load(&data).unwrap()
}

fn predicate(data: serde_json::Value) -> Predicate {
    Predicate::load(&data, &Constants::default(), &RulePath::root()).unwrap()
}

// ===========================================================================
// Predicates over realistic rows
// ===========================================================================

#[test]
fn compound_predicate_over_a_transcript_row() {
    let p = predicate(json!({
        "$and": [
            {"subject": {"$in": ["CSCI", "MATH"]}},
            {"grade": {"$gte": "C"}},
            {"$not": {"s/u": {"$eq": true}}},
        ],
    }));

    let passing = course(json!({
        "clbid": "1", "course": "CSCI 251", "credits": "1.00", "grade": "B",
    }));
    let su = course(json!({
        "clbid": "2", "course": "MATH 230", "credits": "1.00", "grade": "B",
        "grade_option": "s/u",
    }));
    let wrong_subject = course(json!({
        "clbid": "3", "course": "ART 102", "credits": "1.00", "grade": "A",
    }));

    assert!(p.apply(&passing));
    assert!(!p.apply(&su));
    assert!(!p.apply(&wrong_subject));
}

#[test]
fn matriculation_year_constant_flows_into_comparisons() {
    let p = Predicate::load(
        &json!({"year": {"$gte": "$matriculation-year"}}),
        &Constants::new(2019),
        &RulePath::root(),
    )
    .unwrap();

    let newer = course(json!({
        "clbid": "1", "course": "A 1", "credits": "1.00", "year": 2020,
    }));
    let older = course(json!({
        "clbid": "2", "course": "A 2", "credits": "1.00", "year": 2018,
    }));
    assert!(p.apply(&newer));
    assert!(!p.apply(&older));
}

// ===========================================================================
// Assertions with filters and conditions
// ===========================================================================

#[test]
fn assertion_where_filter_composes_with_the_candidate_set() {
    let assertion = Assertion::load(
        &json!({
            "count(courses)": {"$gte": 2},
            "where": {"level": {"$gte": 200}},
        }),
        &Constants::default(),
        &RulePath::root(),
    )
    .unwrap();

    let courses = vec![
        course(json!({"clbid": "1", "course": "CSCI 121", "credits": "1.00"})),
        course(json!({"clbid": "2", "course": "CSCI 251", "credits": "1.00"})),
        course(json!({"clbid": "3", "course": "CSCI 263", "credits": "1.00"})),
    ];

    let resolved = assertion.evaluate(&courses);
    assert!(resolved.result);
    assert_eq!(resolved.reduced, Value::Int(2));
    assert_eq!(resolved.resolved_clbids, vec!["2", "3"]);
}

#[test]
fn conditional_assertion_switches_on_the_candidates() {
    let assertion = AnyAssertion::load(
        &json!({
            "$if": {"subject": {"$eq": "MUSIC"}},
            "$then": {"count(courses)": {"$gte": 2}},
            "$else": {"count(courses)": {"$gte": 1}},
        }),
        &Constants::default(),
        &RulePath::root(),
    )
    .unwrap();

    let non_music = vec![course(json!({
        "clbid": "1", "course": "ART 101", "credits": "1.00",
    }))];
    let resolved = assertion.resolve(&non_music).unwrap();
    assert!(resolved.result, "the else-branch needs only one course");
}

#[test]
fn failed_sum_assertions_rank_by_partial_progress() {
    let assertion = Assertion::load(
        &json!({"sum(credits)": {"$gte": 6}}),
        &Constants::default(),
        &RulePath::root(),
    )
    .unwrap();

    let courses = vec![
        course(json!({"clbid": "1", "course": "A 1", "credits": "1.50"})),
        course(json!({"clbid": "2", "course": "A 2", "credits": "1.50"})),
    ];
    let resolved = assertion.evaluate(&courses);
    assert!(!resolved.result);
    assert_eq!(resolved.rank(), Fraction::new(1, 2));
}

// ===========================================================================
// Claim ledger + multicount policy
// ===========================================================================

#[test]
fn ledger_reset_isolates_solution_attempts() {
    let mut ledger = ClaimLedger::default();
    let c = course(json!({"clbid": "x", "course": "A 1", "credits": "1.00"}));

    let first = ledger.claim(&c, &RulePath::root().index(0), None, false, true);
    assert!(!first.failed);

    ledger.reset();

    // after a reset the same course claims cleanly for a different path
    let second = ledger.claim(&c, &RulePath::root().index(1), None, false, true);
    assert!(!second.failed);
    assert_eq!(ledger.claims_on("x").len(), 1);
}

#[test]
fn at_most_distinguishes_otherwise_equal_claimants() {
    let clause = |at_most: bool| PredicateClause {
        key: "attributes".into(),
        operator: Operator::EqualTo,
        expected: Value::string("elective"),
        expected_verbatim: Value::string("elective"),
        at_most,
    };
    assert_ne!(clause(true), clause(false));

    let policy = Arc::new(vec![vec![clause(false), clause(true)]]);
    let mut ledger = ClaimLedger::new(policy);
    let c = course(json!({
        "clbid": "y", "course": "A 1", "credits": "1.00", "attributes": ["elective"],
    }));

    let p1 = Predicate::Clause(clause(false));
    let p2 = Predicate::Clause(clause(true));
    assert!(!ledger.claim(&c, &RulePath::root().index(0), Some(&p1), false, true).failed);
    assert!(!ledger.claim(&c, &RulePath::root().index(1), Some(&p2), false, true).failed);
}

// ===========================================================================
// Limit engine
// ===========================================================================

#[test]
fn credit_limit_fast_path_keeps_the_whole_set() {
    let limits = LimitSet::load(
        Some(&json!([{"at_most": "4 credits", "where": {"subject": {"$eq": "ART"}}}])),
        &Constants::default(),
        &RulePath::root(),
    )
    .unwrap();

    let courses = vec![
        course(json!({"clbid": "1", "course": "ART 1", "credits": "1.00"})),
        course(json!({"clbid": "2", "course": "ART 2", "credits": "1.00"})),
    ];

    // total matching credits fit under the cap: one transcript, everything in
    let out: Vec<_> = limits.limited_transcripts(&courses, &BTreeSet::new()).collect();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].len(), 2);
}

#[test]
fn transcripts_come_out_in_year_term_clbid_order() {
    let limits = LimitSet::default();
    let courses = vec![
        course(json!({"clbid": "b", "course": "B 2", "credits": "1.00", "year": 2020, "term": 1})),
        course(json!({"clbid": "a", "course": "A 1", "credits": "1.00", "year": 2019, "term": 3})),
    ];

    let out: Vec<_> = limits.limited_transcripts(&courses, &BTreeSet::new()).collect();
    let clbids: Vec<&str> = out[0].iter().map(|c| c.clbid.as_str()).collect();
    assert_eq!(clbids, vec!["a", "b"]);
}

// ===========================================================================
// Students
// ===========================================================================

#[test]
fn student_records_carry_exceptions_and_areas() {
    let student = Student::load(&json!({
        "stnum": "123",
        "matriculation": 2018,
        "areas": [{"code": "140", "kind": "major", "dept": "ART"}],
        "courses": [
            {"clbid": "1", "course": "ART 102", "credits": "1.00", "grade": "A"},
        ],
        "exceptions": [
            {"type": "override", "path": ["$", ".count", "[0]"]},
            {"type": "insert", "path": ["$"], "clbid": "1", "forced": true},
        ],
    }))
    .unwrap();

    assert_eq!(student.areas.len(), 1);
    assert_eq!(student.exceptions.len(), 2);
    assert_eq!(student.courses.len(), 1);
}
