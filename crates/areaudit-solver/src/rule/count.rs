//! "M of N children must pass."

use itertools::Itertools;
use serde_json::{json, Map, Value as Json};

use areaudit_core::{AnyAssertion, AuditError, Constants, Result, RulePath};

use crate::context::SolveContext;
use crate::rule::Rule;
use crate::solution::{CountItem, CountSolution, Solution};

#[derive(Debug, Clone, PartialEq)]
pub struct CountRule {
    pub count: usize,
    pub items: Vec<Rule>,
    pub at_most: bool,
    pub audit_clauses: Vec<AnyAssertion>,
    pub path: RulePath,
}

impl CountRule {
    pub fn load(
        data: &Json,
        children: &Map<String, Json>,
        c: &Constants,
        path: &RulePath,
    ) -> Result<CountRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = ["count", "of", "at_most", "audit"];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in count rule"),
                ));
            }
        }

        let of = obj
            .get("of")
            .and_then(Json::as_array)
            .ok_or_else(|| AuditError::specification(path, "count rule requires an of: list"))?;

        let count_path = path.child(".count");
        let items = of
            .iter()
            .enumerate()
            .map(|(i, rule)| Rule::load(rule, children, c, &count_path.index(i)))
            .collect::<Result<Vec<_>>>()?;

        let count = match obj.get("count") {
            Some(Json::Number(n)) => n
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| AuditError::specification(path, format!("bad count {n}")))?,
            Some(Json::String(s)) if s == "all" => items.len(),
            Some(Json::String(s)) if s == "any" => 1,
            other => {
                return Err(AuditError::specification(
                    path,
                    format!("expected count to be an integer, \"all\", or \"any\"; got {other:?}"),
                ))
            }
        };

        if count > items.len() {
            return Err(AuditError::specification(
                path,
                format!("count {count} exceeds the {} rules given", items.len()),
            ));
        }

        let audit_clauses = match obj.get("audit") {
            None => vec![],
            Some(Json::Array(list)) => list
                .iter()
                .enumerate()
                .map(|(i, a)| AnyAssertion::load(a, c, &count_path.child(".audit").index(i)))
                .collect::<Result<Vec<_>>>()?,
            Some(single) => vec![AnyAssertion::load(single, c, &count_path.child(".audit"))?],
        };

        Ok(CountRule {
            count,
            items,
            at_most: obj.get("at_most").and_then(Json::as_bool).unwrap_or(false),
            audit_clauses,
            path: path.clone(),
        })
    }

    /// Combination sizes to try, complete solutions first.
    fn sizes(&self) -> Vec<usize> {
        if self.at_most {
            vec![self.count.min(self.items.len())]
        } else {
            (self.count..=self.items.len()).rev().collect()
        }
    }

    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        let ctx = ctx.clone();
        let n = self.items.len();

        Box::new(self.sizes().into_iter().flat_map(move |k| {
            let ctx = ctx.clone();
            (0..n).combinations(k).flat_map(move |selected| {
                let child_solutions: Vec<Vec<Solution>> = selected
                    .iter()
                    .map(|i| self.items[*i].solutions(&ctx).collect())
                    .collect();

                child_solutions
                    .into_iter()
                    .map(Vec::into_iter)
                    .multi_cartesian_product()
                    .map(move |chosen| {
                        let mut slots: Vec<Option<Solution>> = vec![None; n];
                        for (slot, solution) in selected.iter().zip(chosen) {
                            slots[*slot] = Some(solution);
                        }
                        let items = self
                            .items
                            .iter()
                            .zip(slots)
                            .map(|(rule, slot)| match slot {
                                Some(solution) => CountItem::Solved(solution),
                                None => CountItem::Skipped(Box::new(rule.clone())),
                            })
                            .collect();

                        Solution::Count(CountSolution {
                            count: self.count,
                            at_most: self.at_most,
                            audit_clauses: self.audit_clauses.clone(),
                            items,
                            path: self.path.clone(),
                        })
                    })
            })
        }))
    }

    pub fn estimate(&self, ctx: &SolveContext) -> u64 {
        let child_estimates: Vec<u64> = self.items.iter().map(|r| r.estimate(ctx)).collect();

        let mut total: u64 = 0;
        for k in self.sizes() {
            for combo in (0..child_estimates.len()).combinations(k) {
                let product = combo
                    .iter()
                    .fold(1u64, |acc, i| acc.saturating_mul(child_estimates[*i]));
                total = total.saturating_add(product);
            }
        }
        total
    }

    pub fn to_spec_json(&self, requirements: &mut Map<String, Json>) -> Json {
        let mut obj = Map::new();
        obj.insert("count".into(), json!(self.count));
        obj.insert(
            "of".into(),
            Json::Array(
                self.items
                    .iter()
                    .map(|r| r.to_spec_json(requirements))
                    .collect(),
            ),
        );
        if self.at_most {
            obj.insert("at_most".into(), json!(true));
        }
        if !self.audit_clauses.is_empty() {
            obj.insert(
                "audit".into(),
                Json::Array(self.audit_clauses.iter().map(AnyAssertion::to_json).collect()),
            );
        }
        Json::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(data: Json) -> CountRule {
        CountRule::load(
            data.as_object().unwrap().get("rule").unwrap(),
            &Map::new(),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap()
    }

    #[test]
    fn all_and_any_resolve_against_the_child_list() {
        let all = load(json!({"rule": {"count": "all", "of": [{"course": "A 1"}, {"course": "B 2"}]}}));
        assert_eq!(all.count, 2);

        let any = load(json!({"rule": {"count": "any", "of": [{"course": "A 1"}, {"course": "B 2"}]}}));
        assert_eq!(any.count, 1);
    }

    #[test]
    fn children_get_indexed_paths() {
        let rule = load(json!({"rule": {"count": 1, "of": [{"course": "A 1"}, {"course": "B 2"}]}}));
        assert_eq!(
            rule.items[1].path().segments(),
            &["$", ".count", "[1]"]
        );
    }

    #[test]
    fn count_beyond_children_is_a_specification_error() {
        let err = CountRule::load(
            &json!({"count": 3, "of": [{"course": "A 1"}]}),
            &Map::new(),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }

    #[test]
    fn sizes_descend_from_complete() {
        let rule = load(json!({"rule": {"count": 1, "of": [{"course": "A 1"}, {"course": "B 2"}]}}));
        assert_eq!(rule.sizes(), vec![2, 1]);

        let capped = load(json!({"rule": {
            "count": 1, "at_most": true,
            "of": [{"course": "A 1"}, {"course": "B 2"}],
        }}));
        assert_eq!(capped.sizes(), vec![1]);
    }
}
