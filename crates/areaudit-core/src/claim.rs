//! The claim ledger.
//!
//! One ledger exists per candidate solution attempt. It is single-writer:
//! parallel audits hold independent ledgers, and nothing here is shared
//! across threads.

use serde_json::{json, Value as Json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::course::CourseInstance;
use crate::path::RulePath;
use crate::predicate::{Predicate, PredicateClause};

/// A committed assertion that one course counts toward one rule path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub clbid: String,
    pub claimed_by: RulePath,
    pub clause: Option<Predicate>,
}

/// The outcome of a claim. A failed attempt is not an error: the enclosing
/// rule treats it as "this candidate cannot pass" and backtracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAttempt {
    pub claim: Claim,
    pub conflicts: Vec<Claim>,
    pub failed: bool,
}

impl ClaimAttempt {
    pub fn to_json(&self) -> Json {
        json!({
            "clbid": self.claim.clbid,
            "claimed_by": self.claim.claimed_by.segments(),
            "failed": self.failed,
            "conflicts": self.conflicts.iter()
                .map(|c| json!({"clbid": c.clbid, "claimed_by": c.claimed_by.segments()}))
                .collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClaimLedger {
    claims: HashMap<String, Vec<Claim>>,
    multicountable: Arc<Vec<Vec<PredicateClause>>>,
}

impl ClaimLedger {
    pub fn new(multicountable: Arc<Vec<Vec<PredicateClause>>>) -> Self {
        ClaimLedger {
            claims: HashMap::new(),
            multicountable,
        }
    }

    /// Attempt to claim a course for a rule path.
    ///
    /// `allow_claimed` skips conflict enforcement entirely; `record` decides
    /// whether a successful claim enters the ledger at all (claim-free
    /// queries examine courses without reserving them).
    pub fn claim(
        &mut self,
        course: &CourseInstance,
        by: &RulePath,
        clause: Option<&Predicate>,
        allow_claimed: bool,
        record: bool,
    ) -> ClaimAttempt {
        let claim = Claim {
            clbid: course.clbid.clone(),
            claimed_by: by.clone(),
            clause: clause.cloned(),
        };

        if !record {
            return ClaimAttempt {
                claim,
                conflicts: vec![],
                failed: false,
            };
        }

        let conflicts: Vec<Claim> = self
            .claims
            .get(&course.clbid)
            .map(|existing| {
                existing
                    .iter()
                    .filter(|c| c.claimed_by != *by)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let permitted = conflicts.is_empty()
            || allow_claimed
            || self.overlap_permitted(course, &conflicts, &claim);

        if permitted {
            debug!(clbid = %course.clbid, path = %by, "claim committed");
            self.claims
                .entry(course.clbid.clone())
                .or_default()
                .push(claim.clone());
            ClaimAttempt {
                claim,
                conflicts,
                failed: false,
            }
        } else {
            debug!(clbid = %course.clbid, path = %by, "claim rejected");
            ClaimAttempt {
                claim,
                conflicts,
                failed: true,
            }
        }
    }

    /// Clear all claims; used between solution attempts drawn from the same
    /// limited transcript.
    pub fn reset(&mut self) {
        self.claims.clear();
    }

    pub fn claimed_clbids(&self) -> BTreeSet<String> {
        self.claims.keys().cloned().collect()
    }

    pub fn claims_on(&self, clbid: &str) -> &[Claim] {
        self.claims.get(clbid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// An overlapping claim is permitted iff some configured group supplies
    /// a distinct course-matching member covering every claimant's clause.
    fn overlap_permitted(&self, course: &CourseInstance, existing: &[Claim], new: &Claim) -> bool {
        let mut claimant_clauses: Vec<&Predicate> = Vec::with_capacity(existing.len() + 1);
        for claim in existing.iter().chain(std::iter::once(new)) {
            match &claim.clause {
                Some(clause) => claimant_clauses.push(clause),
                // a claimant with no clause identity can never overlap
                None => return false,
            }
        }

        self.multicountable.iter().any(|group| {
            let applicable: Vec<&PredicateClause> =
                group.iter().filter(|member| member.apply(course)).collect();
            assign_distinct(&claimant_clauses, &applicable, 0, &mut vec![false; applicable.len()])
        })
    }
}

/// Try to injectively assign each claimant to a distinct covering member.
fn assign_distinct(
    claimants: &[&Predicate],
    members: &[&PredicateClause],
    index: usize,
    used: &mut Vec<bool>,
) -> bool {
    if index == claimants.len() {
        return true;
    }

    for (m, member) in members.iter().enumerate() {
        if used[m] || !claimants[index].is_subset_of(member) {
            continue;
        }
        used[m] = true;
        if assign_distinct(claimants, members, index + 1, used) {
            used[m] = false;
            return true;
        }
        used[m] = false;
    }

    false
}
