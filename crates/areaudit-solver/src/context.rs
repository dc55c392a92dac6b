//! Solve and audit contexts.
//!
//! `SolveContext` is the immutable half: the limited transcript, declared
//! areas, proficiencies, exceptions, and audit facts, all behind `Arc`s so
//! solution iterators can capture clones without borrowing. `AuditContext`
//! adds the per-attempt claim ledger, the only mutable state in an audit.

use std::collections::BTreeSet;
use std::sync::Arc;

use areaudit_core::{
    AreaPointer, Clausable, ClaimAttempt, ClaimLedger, CourseInstance, Predicate, PredicateClause,
    RuleException, RulePath, Value,
};

/// Facts a conditional rule's predicate can see.
#[derive(Debug, Clone, Default)]
pub struct AuditFacts {
    pub degree: Option<String>,
    pub area_codes: Vec<String>,
    pub area_kinds: Vec<String>,
    pub matriculation_year: i64,
}

impl Clausable for AuditFacts {
    fn clause_value(&self, key: &str) -> Option<Value> {
        let value = match key {
            "degree" => Value::string(self.degree.clone()?),
            "matriculation-year" => Value::Int(self.matriculation_year),
            "area-codes" => Value::List(self.area_codes.iter().map(Value::string).collect()),
            "area-types" => Value::List(self.area_kinds.iter().map(Value::string).collect()),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone)]
pub struct SolveContext {
    transcript: Arc<Vec<CourseInstance>>,
    areas: Arc<Vec<AreaPointer>>,
    proficiencies: Arc<BTreeSet<String>>,
    exceptions: Arc<Vec<RuleException>>,
    facts: Arc<AuditFacts>,
}

impl SolveContext {
    pub fn new(
        transcript: Vec<CourseInstance>,
        areas: Vec<AreaPointer>,
        proficiencies: BTreeSet<String>,
        exceptions: Vec<RuleException>,
        facts: AuditFacts,
    ) -> Self {
        SolveContext {
            transcript: Arc::new(transcript),
            areas: Arc::new(areas),
            proficiencies: Arc::new(proficiencies),
            exceptions: Arc::new(exceptions),
            facts: Arc::new(facts),
        }
    }

    /// The same context over a different transcript; used by the common
    /// major requirements, which audit the claimed course set.
    pub fn with_transcript(&self, transcript: Vec<CourseInstance>) -> SolveContext {
        SolveContext {
            transcript: Arc::new(transcript),
            areas: self.areas.clone(),
            proficiencies: self.proficiencies.clone(),
            exceptions: self.exceptions.clone(),
            facts: self.facts.clone(),
        }
    }

    pub fn transcript(&self) -> &[CourseInstance] {
        &self.transcript
    }

    pub fn areas(&self) -> &[AreaPointer] {
        &self.areas
    }

    pub fn facts(&self) -> &AuditFacts {
        &self.facts
    }

    pub fn has_proficiency(&self, name: &str) -> bool {
        self.proficiencies.contains(name)
    }

    pub fn is_overridden(&self, path: &RulePath) -> bool {
        self.exceptions
            .iter()
            .any(|e| matches!(e, RuleException::Override { path: p } if p == path))
    }

    /// Clbids inserted at this exact rule path.
    pub fn inserted_clbids(&self, path: &RulePath) -> Vec<&str> {
        self.exceptions
            .iter()
            .filter_map(|e| match e {
                RuleException::Insert { path: p, clbid, .. } if p == path => Some(clbid.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Clbids that bypass limit accounting entirely.
    pub fn forced_clbids(&self) -> BTreeSet<String> {
        self.exceptions
            .iter()
            .filter_map(|e| match e {
                RuleException::Insert {
                    clbid,
                    forced: true,
                    ..
                } => Some(clbid.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn find_course_by_clbid(&self, clbid: &str) -> Option<&CourseInstance> {
        self.transcript.iter().find(|c| c.clbid == clbid)
    }
}

/// The mutable half of an audit attempt. Never shared across concurrent
/// solution branches; the driver builds a fresh one per candidate solution.
#[derive(Debug)]
pub struct AuditContext {
    pub solve: SolveContext,
    ledger: ClaimLedger,
}

impl AuditContext {
    pub fn new(solve: SolveContext, multicountable: Arc<Vec<Vec<PredicateClause>>>) -> Self {
        AuditContext {
            solve,
            ledger: ClaimLedger::new(multicountable),
        }
    }

    pub fn make_claim(
        &mut self,
        course: &CourseInstance,
        by: &RulePath,
        clause: Option<&Predicate>,
        allow_claimed: bool,
        record: bool,
    ) -> ClaimAttempt {
        self.ledger.claim(course, by, clause, allow_claimed, record)
    }

    pub fn reset_claims(&mut self) {
        self.ledger.reset();
    }

    pub fn claimed_clbids(&self) -> BTreeSet<String> {
        self.ledger.claimed_clbids()
    }

    /// Transcript courses that currently hold a committed claim, in
    /// transcript order.
    pub fn claimed_courses(&self) -> Vec<CourseInstance> {
        let claimed = self.ledger.claimed_clbids();
        self.solve
            .transcript()
            .iter()
            .filter(|c| claimed.contains(&c.clbid))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn course(clbid: &str, code: &str) -> CourseInstance {
        CourseInstance::load(&json!({
            "clbid": clbid, "course": code, "credits": "1.00", "grade": "A",
        }))
        .unwrap()
    }

    #[test]
    fn overrides_and_insertions_resolve_by_path() {
        let target = RulePath::root().child(".count").index(1);
        let ctx = SolveContext::new(
            vec![course("1", "A 1")],
            vec![],
            BTreeSet::new(),
            vec![
                RuleException::Override {
                    path: target.clone(),
                },
                RuleException::Insert {
                    path: RulePath::root(),
                    clbid: "9".into(),
                    forced: true,
                },
            ],
            AuditFacts::default(),
        );

        assert!(ctx.is_overridden(&target));
        assert!(!ctx.is_overridden(&RulePath::root()));
        assert_eq!(ctx.inserted_clbids(&RulePath::root()), vec!["9"]);
        assert!(ctx.forced_clbids().contains("9"));
    }

    #[test]
    fn claimed_courses_follow_the_ledger() {
        let ctx = SolveContext::new(
            vec![course("1", "A 1"), course("2", "B 2")],
            vec![],
            BTreeSet::new(),
            vec![],
            AuditFacts::default(),
        );
        let mut audit = AuditContext::new(ctx, Arc::new(vec![]));

        let one = audit.solve.find_course_by_clbid("1").cloned().unwrap();
        audit.make_claim(&one, &RulePath::root(), None, false, true);

        let claimed = audit.claimed_courses();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].clbid, "1");

        audit.reset_claims();
        assert!(audit.claimed_courses().is_empty());
    }
}
