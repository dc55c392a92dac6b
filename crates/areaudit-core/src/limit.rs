//! The limit engine.
//!
//! A limit caps how many matching courses (or credits) may be considered at
//! once. `LimitSet::limited_transcripts` enumerates every distinct course
//! subset that satisfies all limits, crossing the per-limit choices with a
//! lazy cartesian product so the full product is never materialised.

use itertools::Itertools;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;
use tracing::debug;

use crate::constants::Constants;
use crate::course::CourseInstance;
use crate::error::{AuditError, Result};
use crate::path::RulePath;
use crate::predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtMostWhat {
    Courses,
    Credits,
}

impl AtMostWhat {
    pub fn as_str(self) -> &'static str {
        match self {
            AtMostWhat::Courses => "courses",
            AtMostWhat::Credits => "credits",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    pub at_most: Decimal,
    pub at_most_what: AtMostWhat,
    pub where_clause: Predicate,
    pub message: Option<String>,
}

impl Limit {
    pub fn load(data: &Json, c: &Constants, path: &RulePath) -> Result<Limit> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = ["at most", "at-most", "at_most", "where", "message"];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in limit"),
                ));
            }
        }

        let raw = obj
            .get("at most")
            .or_else(|| obj.get("at-most"))
            .or_else(|| obj.get("at_most"))
            .ok_or_else(|| AuditError::specification(path, "expected an at-most key"))?;
        let (at_most, at_most_what) = parse_at_most(raw, path)?;

        let where_data = obj
            .get("where")
            .ok_or_else(|| AuditError::specification(path, "limits require a where clause"))?;
        let where_clause = Predicate::load(where_data, c, path)?;

        Ok(Limit {
            at_most,
            at_most_what,
            where_clause,
            message: obj.get("message").and_then(Json::as_str).map(str::to_string),
        })
    }

    /// Every allowed subset of the matching courses, in deterministic order.
    /// The input must already be sorted by `sort_order`.
    fn iterate<'a>(
        &'a self,
        courses: Vec<&'a CourseInstance>,
    ) -> Box<dyn Iterator<Item = Vec<&'a CourseInstance>> + 'a> {
        match self.at_most_what {
            AtMostWhat::Courses => {
                let cap = self.at_most.to_usize().unwrap_or(0).min(courses.len());
                Box::new((0..=cap).flat_map(move |n| courses.clone().into_iter().combinations(n)))
            }
            AtMostWhat::Credits => {
                let total: Decimal = courses.iter().map(|c| c.credits).sum();
                if total <= self.at_most {
                    return Box::new(std::iter::once(courses));
                }
                let cap = self.at_most;
                let len = courses.len();
                Box::new((0..=len).flat_map(move |n| {
                    courses
                        .clone()
                        .into_iter()
                        .combinations(n)
                        .filter(move |combo| {
                            combo.iter().map(|c| c.credits).sum::<Decimal>() <= cap
                        })
                }))
            }
        }
    }

    pub fn estimate(&self, matching: usize) -> u64 {
        let n = matching as u64;
        match self.at_most_what {
            AtMostWhat::Courses => {
                let cap = self.at_most.to_u64().unwrap_or(0);
                (0..=cap).map(|k| ncr(n, k)).sum()
            }
            AtMostWhat::Credits => (1..=n).map(|k| ncr(n, k)).sum(),
        }
    }

    pub fn to_json(&self) -> Json {
        json!({
            "type": "limit",
            "at_most": self.at_most.to_string(),
            "at_most_what": self.at_most_what.as_str(),
            "where": self.where_clause.to_json(),
            "message": self.message,
        })
    }
}

fn parse_at_most(raw: &Json, path: &RulePath) -> Result<(Decimal, AtMostWhat)> {
    match raw {
        Json::Number(n) => {
            let d = Decimal::from_str(&n.to_string())
                .map_err(|_| AuditError::specification(path, format!("bad at-most value {n}")))?;
            Ok((d, AtMostWhat::Courses))
        }
        Json::String(s) => {
            let parts: Vec<&str> = s.split_whitespace().collect();
            match parts.as_slice() {
                [n] => {
                    let d = Decimal::from_str(n).map_err(|_| {
                        AuditError::specification(path, format!("bad at-most value {s:?}"))
                    })?;
                    Ok((d, AtMostWhat::Courses))
                }
                [n, unit] => {
                    let d = Decimal::from_str(n).map_err(|_| {
                        AuditError::specification(path, format!("bad at-most value {s:?}"))
                    })?;
                    let what = match *unit {
                        "course" | "courses" => AtMostWhat::Courses,
                        "credit" | "credits" => AtMostWhat::Credits,
                        _ => {
                            return Err(AuditError::specification(
                                path,
                                format!("expected course|credits, got {unit:?}"),
                            ))
                        }
                    };
                    Ok((d, what))
                }
                _ => Err(AuditError::specification(
                    path,
                    format!("bad at-most value {s:?}"),
                )),
            }
        }
        other => Err(AuditError::specification(
            path,
            format!("bad at-most value {other}"),
        )),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitSet {
    pub limits: Vec<Limit>,
}

impl LimitSet {
    pub fn load(data: Option<&Json>, c: &Constants, path: &RulePath) -> Result<LimitSet> {
        let Some(data) = data else {
            return Ok(LimitSet::default());
        };
        let items = data.as_array().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a list of limits"))
        })?;
        let limits = items
            .iter()
            .map(|d| Limit::load(d, c, path))
            .collect::<Result<Vec<_>>>()?;
        Ok(LimitSet { limits })
    }

    pub fn has_limits(&self) -> bool {
        !self.limits.is_empty()
    }

    /// Does this collection satisfy every limit?
    pub fn check<'b>(&self, courses: impl IntoIterator<Item = &'b CourseInstance>) -> bool {
        let mut counters: Vec<Decimal> = vec![Decimal::ZERO; self.limits.len()];

        for course in courses {
            for (i, limit) in self.limits.iter().enumerate() {
                if !limit.where_clause.apply(course) {
                    continue;
                }
                if counters[i] >= limit.at_most {
                    return false;
                }
                counters[i] += match limit.at_most_what {
                    AtMostWhat::Courses => Decimal::ONE,
                    AtMostWhat::Credits => course.credits,
                };
            }
        }

        true
    }

    /// Enumerate each distinct course subset satisfying every limit.
    ///
    /// Courses matching no limit are unconstrained and always present;
    /// force-inserted clbids bypass limit accounting entirely.
    pub fn limited_transcripts<'a>(
        &'a self,
        courses: &'a [CourseInstance],
        forced_clbids: &BTreeSet<String>,
    ) -> Box<dyn Iterator<Item = Vec<CourseInstance>> + 'a> {
        // sort the input so output order is stable regardless of source order
        let mut sorted: Vec<&CourseInstance> = courses.iter().collect();
        sorted.sort_by_key(|c| c.sort_order());

        if self.limits.is_empty() {
            debug!("no limits to apply");
            let full: Vec<CourseInstance> = sorted.into_iter().cloned().collect();
            return Box::new(std::iter::once(full));
        }

        debug!("applying limits");

        let forced: BTreeSet<&str> = sorted
            .iter()
            .filter(|c| forced_clbids.contains(&c.clbid))
            .map(|c| c.clbid.as_str())
            .collect();

        let matched: Vec<Vec<&CourseInstance>> = self
            .limits
            .iter()
            .map(|limit| {
                sorted
                    .iter()
                    .filter(|c| !forced.contains(c.clbid.as_str()))
                    .filter(|c| limit.where_clause.apply(**c))
                    .copied()
                    .collect()
            })
            .collect();

        let all_matched: HashSet<&str> = matched
            .iter()
            .flatten()
            .map(|c| c.clbid.as_str())
            .collect();
        let unmatched: Vec<&CourseInstance> = sorted
            .iter()
            .filter(|c| !all_matched.contains(c.clbid.as_str()))
            .copied()
            .collect();

        let factories: Vec<Factory<'a>> = self
            .limits
            .iter()
            .zip(matched)
            .map(|(limit, match_set)| {
                let factory: Factory<'a> = Box::new(move || limit.iterate(match_set.clone()));
                factory
            })
            .collect();

        let mut emitted: HashSet<BTreeSet<String>> = HashSet::new();
        Box::new(LazyProduct::new(factories).filter_map(move |groups| {
            // a course may satisfy several limits; combine as a set
            let mut chosen: BTreeMap<(i64, i64, String, String), &CourseInstance> = BTreeMap::new();
            for course in groups.iter().flatten() {
                chosen.insert(course.sort_order(), *course);
            }

            if !self.check(chosen.values().copied()) {
                return None;
            }

            let identity: BTreeSet<String> =
                chosen.values().map(|c| c.clbid.clone()).collect();
            if !emitted.insert(identity) {
                return None;
            }

            let mut combo: Vec<CourseInstance> = unmatched
                .iter()
                .copied()
                .chain(chosen.values().copied())
                .cloned()
                .collect();
            combo.sort_by_key(|c| c.sort_order());
            Some(combo)
        }))
    }

    pub fn estimate(&self, courses: &[CourseInstance]) -> u64 {
        self.limited_transcripts(courses, &BTreeSet::new()).count() as u64
    }

    pub fn to_json(&self) -> Json {
        Json::Array(self.limits.iter().map(Limit::to_json).collect())
    }
}

type Factory<'a> =
    Box<dyn Fn() -> Box<dyn Iterator<Item = Vec<&'a CourseInstance>> + 'a> + 'a>;

/// Cartesian product over restartable iterators, pull-based: no per-factory
/// materialisation beyond the current position.
struct LazyProduct<'a> {
    factories: Vec<Factory<'a>>,
    iters: Vec<Box<dyn Iterator<Item = Vec<&'a CourseInstance>> + 'a>>,
    current: Vec<Vec<&'a CourseInstance>>,
    started: bool,
    done: bool,
}

impl<'a> LazyProduct<'a> {
    fn new(factories: Vec<Factory<'a>>) -> Self {
        LazyProduct {
            factories,
            iters: Vec::new(),
            current: Vec::new(),
            started: false,
            done: false,
        }
    }
}

impl<'a> Iterator for LazyProduct<'a> {
    type Item = Vec<Vec<&'a CourseInstance>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.started {
            self.started = true;
            for factory in &self.factories {
                let mut iter = factory();
                match iter.next() {
                    Some(first) => {
                        self.iters.push(iter);
                        self.current.push(first);
                    }
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            }
            return Some(self.current.clone());
        }

        let mut position = self.factories.len();
        loop {
            if position == 0 {
                self.done = true;
                return None;
            }
            position -= 1;

            if let Some(value) = self.iters[position].next() {
                self.current[position] = value;
                for later in position + 1..self.factories.len() {
                    let mut iter = (self.factories[later])();
                    match iter.next() {
                        Some(first) => {
                            self.iters[later] = iter;
                            self.current[later] = first;
                        }
                        None => {
                            self.done = true;
                            return None;
                        }
                    }
                }
                return Some(self.current.clone());
            }
        }
    }
}

/// n choose r, saturating.
pub fn ncr(n: u64, r: u64) -> u64 {
    if r > n {
        return 0;
    }
    let r = r.min(n - r);
    let mut acc: u64 = 1;
    for i in 0..r {
        acc = acc.saturating_mul(n - i) / (i + 1);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn course(clbid: &str, code: &str, credits: &str) -> CourseInstance {
        CourseInstance::load(&json!({
            "clbid": clbid, "course": code, "credits": credits, "grade": "A",
            "year": 2019, "term": 1,
        }))
        .unwrap()
    }

    fn limit_set(data: Json) -> LimitSet {
        LimitSet::load(Some(&data), &Constants::default(), &RulePath::root()).unwrap()
    }

    #[test]
    fn ncr_values() {
        assert_eq!(ncr(4, 2), 6);
        assert_eq!(ncr(4, 0), 1);
        assert_eq!(ncr(4, 5), 0);
        assert_eq!(ncr(10, 3), 120);
    }

    #[test]
    fn no_limits_yields_the_full_transcript_once() {
        let limits = LimitSet::default();
        let courses = vec![course("1", "A 1", "1.00"), course("2", "B 2", "1.00")];
        let out: Vec<_> = limits.limited_transcripts(&courses, &BTreeSet::new()).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);
    }

    #[test]
    fn course_limit_enumerates_subsets_up_to_the_cap() {
        let limits = limit_set(json!([
            {"at_most": 2, "where": {"subject": {"$eq": "ART"}}},
        ]));
        let courses = vec![
            course("a", "ART 1", "1.00"),
            course("b", "ART 2", "1.00"),
            course("c", "ART 3", "1.00"),
            course("d", "MATH 1", "1.00"),
        ];

        let out: Vec<_> = limits.limited_transcripts(&courses, &BTreeSet::new()).collect();
        // C(3,0) + C(3,1) + C(3,2) = 1 + 3 + 3
        assert_eq!(out.len(), 7);

        for transcript in &out {
            assert!(limits.check(transcript.iter()));
            let art = transcript.iter().filter(|c| c.subject == "ART").count();
            assert!(art <= 2);
            // the unconstrained course is always present
            assert!(transcript.iter().any(|c| c.clbid == "d"));
        }

        // every emitted subset is distinct as a set
        let identities: HashSet<BTreeSet<String>> = out
            .iter()
            .map(|t| t.iter().map(|c| c.clbid.clone()).collect())
            .collect();
        assert_eq!(identities.len(), out.len());
    }

    #[test]
    fn credit_limit_respects_the_credit_cap() {
        let limits = limit_set(json!([
            {"at_most": "2 credits", "where": {"subject": {"$eq": "ART"}}},
        ]));
        let courses = vec![
            course("a", "ART 1", "1.50"),
            course("b", "ART 2", "1.50"),
            course("c", "MATH 1", "1.00"),
        ];

        for transcript in limits.limited_transcripts(&courses, &BTreeSet::new()) {
            let art_credits: Decimal = transcript
                .iter()
                .filter(|c| c.subject == "ART")
                .map(|c| c.credits)
                .sum();
            assert!(art_credits <= Decimal::TWO);
        }
    }

    #[test]
    fn forced_courses_bypass_limit_accounting() {
        let limits = limit_set(json!([
            {"at_most": 1, "where": {"subject": {"$eq": "ART"}}},
        ]));
        let courses = vec![course("a", "ART 1", "1.00"), course("b", "ART 2", "1.00")];
        let forced: BTreeSet<String> = ["a".to_string()].into();

        let out: Vec<_> = limits.limited_transcripts(&courses, &forced).collect();
        for transcript in &out {
            assert!(transcript.iter().any(|c| c.clbid == "a"));
        }
        // b alone is limited: with or without it
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn two_limits_cross_product_deduplicates() {
        // one course satisfies both limits; the combined subset must appear once
        let limits = limit_set(json!([
            {"at_most": 1, "where": {"subject": {"$eq": "ART"}}},
            {"at_most": 1, "where": {"attributes": {"$eq": "studio"}}},
        ]));
        let both = CourseInstance::load(&json!({
            "clbid": "x", "course": "ART 1", "credits": "1.00", "grade": "A",
            "attributes": ["studio"],
        }))
        .unwrap();
        let courses = vec![both];

        let out: Vec<_> = limits.limited_transcripts(&courses, &BTreeSet::new()).collect();
        let identities: HashSet<BTreeSet<String>> = out
            .iter()
            .map(|t| t.iter().map(|c| c.clbid.clone()).collect())
            .collect();
        assert_eq!(identities.len(), out.len());
    }

    #[test]
    fn estimate_counts_emitted_transcripts() {
        let limits = limit_set(json!([
            {"at_most": 2, "where": {"subject": {"$eq": "ART"}}},
        ]));
        let courses = vec![
            course("a", "ART 1", "1.00"),
            course("b", "ART 2", "1.00"),
            course("c", "ART 3", "1.00"),
        ];
        assert_eq!(limits.estimate(&courses), 7);
    }

    #[test]
    fn per_limit_estimate_is_a_binomial_sum() {
        let limits = limit_set(json!([
            {"at_most": 2, "where": {"subject": {"$eq": "ART"}}},
        ]));
        // C(4,0) + C(4,1) + C(4,2)
        assert_eq!(limits.limits[0].estimate(4), 11);
    }

    #[test]
    fn string_at_most_forms() {
        let limits = limit_set(json!([
            {"at most": "1 course", "where": {"subject": {"$eq": "X"}}},
        ]));
        assert_eq!(limits.limits[0].at_most_what, AtMostWhat::Courses);
        assert_eq!(limits.limits[0].at_most, Decimal::ONE);
    }

    #[test]
    fn unknown_limit_keys_are_specification_errors() {
        let err = LimitSet::load(
            Some(&json!([{"at_most": 1, "filter": {}}])),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }
}
