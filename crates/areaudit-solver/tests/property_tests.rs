//! Property tests for the solver's quantified invariants.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use areaudit_core::{Constants, CourseInstance, LimitSet, Predicate, RulePath, Student};
use areaudit_solver::{run_audit, AreaOfStudy, AreaResult, AuditOptions};

fn course_row(i: usize, subject: &str, number: u32, grade: &str) -> Json {
    json!({
        "clbid": format!("clbid-{i}"),
        "course": format!("{subject} {number}"),
        "credits": "1.00",
        "grade": grade,
        "year": 2019 + (i as i64 % 3),
        "term": 1 + (i as i64 % 3),
    })
}

fn transcript_strategy() -> impl Strategy<Value = Vec<Json>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["ART", "CSCI", "MATH"]),
            100u32..400,
            prop::sample::select(vec!["A", "B", "C", "D"]),
        ),
        0..6,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (subject, number, grade))| course_row(i, subject, number, grade))
            .collect()
    })
}

fn area_spec() -> Json {
    json!({
        "name": "Property", "type": "test", "code": "900",
        "result": {"count": 1, "of": [
            {"course": "CSCI 121"},
            {"from": "courses",
             "where": {"subject": {"$eq": "ART"}},
             "assert": {"count(courses)": {"$gte": 2}}},
        ]},
    })
}

fn run(area_spec: Json, rows: &[Json]) -> Option<AreaResult> {
    let student = Student::load(&json!({ "courses": rows })).unwrap();
    let constants = Constants::new(student.matriculation);
    let area = AreaOfStudy::load(&area_spec, &constants, &student.areas).unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    run_audit(
        &area,
        &student,
        &AuditOptions::default(),
        &CancellationToken::new(),
        &tx,
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn claimed_courses_are_a_subset_of_the_transcript(rows in transcript_strategy()) {
        if let Some(best) = run(area_spec(), &rows) {
            let transcript: BTreeSet<String> = rows
                .iter()
                .map(|r| r["clbid"].as_str().unwrap().to_string())
                .collect();
            for clbid in best.claimed_clbids() {
                prop_assert!(transcript.contains(&clbid));
            }
        }
    }

    #[test]
    fn no_two_live_claims_share_a_clbid_without_a_policy(rows in transcript_strategy()) {
        if let Some(best) = run(area_spec(), &rows) {
            let mut seen = BTreeSet::new();
            for attempt in best.result.claims() {
                if attempt.failed {
                    continue;
                }
                prop_assert!(
                    seen.insert(attempt.claim.clbid.clone()),
                    "duplicate live claim on {}",
                    attempt.claim.clbid,
                );
            }
        }
    }

    #[test]
    fn rank_never_exceeds_max_rank(rows in transcript_strategy()) {
        if let Some(best) = run(area_spec(), &rows) {
            prop_assert!(best.rank() <= best.max_rank());
            prop_assert!(best.result.check_invariants().is_ok());
        }
    }

    #[test]
    fn ok_implies_a_passing_status(rows in transcript_strategy()) {
        if let Some(best) = run(area_spec(), &rows) {
            if best.is_ok() {
                prop_assert!(best.status().is_passing());
            }
        }
    }

    #[test]
    fn audits_are_deterministic(rows in transcript_strategy()) {
        let first = run(area_spec(), &rows).map(|r| r.to_json().to_string());
        let second = run(area_spec(), &rows).map(|r| r.to_json().to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn limited_transcripts_satisfy_every_limit_and_are_distinct(
        rows in transcript_strategy(),
        cap in 0u32..3,
    ) {
        let limits = LimitSet::load(
            Some(&json!([{"at_most": cap, "where": {"subject": {"$eq": "ART"}}}])),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap();

        let courses: Vec<CourseInstance> = rows
            .iter()
            .map(|r| CourseInstance::load(r).unwrap())
            .collect();

        let mut identities: BTreeSet<BTreeSet<String>> = BTreeSet::new();
        for subset in limits.limited_transcripts(&courses, &BTreeSet::new()) {
            prop_assert!(limits.check(subset.iter()));
            let identity: BTreeSet<String> =
                subset.iter().map(|c| c.clbid.clone()).collect();
            prop_assert!(identities.insert(identity), "duplicate subset emitted");
        }
    }

    #[test]
    fn predicates_are_idempotent(rows in transcript_strategy()) {
        let predicate = Predicate::load(
            &json!({"$or": [
                {"subject": {"$eq": "CSCI"}},
                {"grade": {"$gte": "C"}},
            ]}),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap();

        for row in &rows {
            let course = CourseInstance::load(row).unwrap();
            prop_assert_eq!(predicate.apply(&course), predicate.apply(&course));
        }
    }
}
