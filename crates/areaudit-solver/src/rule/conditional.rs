//! Conditional rules: if-predicate over audit facts, then/else branches.
//!
//! The untaken branch is never solved and attempts no claims; a missing
//! else-branch makes a false condition a waived pass.

use serde_json::{Map, Value as Json};

use areaudit_core::{AuditError, Constants, Predicate, Result, RulePath};

use crate::context::SolveContext;
use crate::rule::Rule;
use crate::solution::{ConditionalSolution, Solution};

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalRule {
    pub condition: Predicate,
    pub when_true: Box<Rule>,
    pub when_false: Option<Box<Rule>>,
    pub path: RulePath,
}

impl ConditionalRule {
    pub fn load(
        data: &Json,
        children: &Map<String, Json>,
        c: &Constants,
        path: &RulePath,
    ) -> Result<ConditionalRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let allowed = ["if", "then", "else"];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    path,
                    format!("unexpected key {key:?} in conditional rule"),
                ));
            }
        }

        let condition = Predicate::load(
            obj.get("if")
                .ok_or_else(|| AuditError::specification(path, "conditional rule needs if:"))?,
            c,
            &path.child(".if"),
        )?;

        let when_true = obj
            .get("then")
            .ok_or_else(|| AuditError::specification(path, "conditional rule needs then:"))?;
        let when_true = Box::new(Rule::load(when_true, children, c, &path.child(".then"))?);

        let when_false = obj
            .get("else")
            .map(|e| Rule::load(e, children, c, &path.child(".else")).map(Box::new))
            .transpose()?;

        Ok(ConditionalRule {
            condition,
            when_true,
            when_false,
            path: path.clone(),
        })
    }

    fn branch(&self, ctx: &SolveContext) -> (bool, Option<&Rule>) {
        if self.condition.apply(ctx.facts()) {
            (true, Some(&self.when_true))
        } else {
            (false, self.when_false.as_deref())
        }
    }

    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        let (taken_true, branch) = self.branch(ctx);

        match branch {
            None => Box::new(std::iter::once(Solution::Conditional(ConditionalSolution {
                condition: self.condition.clone(),
                taken_true,
                path: self.path.clone(),
                result: None,
            }))),
            Some(rule) => {
                let condition = self.condition.clone();
                let path = self.path.clone();
                Box::new(rule.solutions(ctx).map(move |solution| {
                    Solution::Conditional(ConditionalSolution {
                        condition: condition.clone(),
                        taken_true,
                        path: path.clone(),
                        result: Some(Box::new(solution)),
                    })
                }))
            }
        }
    }

    pub fn estimate(&self, ctx: &SolveContext) -> u64 {
        match self.branch(ctx) {
            (_, Some(rule)) => rule.estimate(ctx),
            (_, None) => 1,
        }
    }

    pub fn to_spec_json(&self, requirements: &mut Map<String, Json>) -> Json {
        let mut obj = Map::new();
        obj.insert("if".into(), self.condition.to_json());
        obj.insert("then".into(), self.when_true.to_spec_json(requirements));
        if let Some(wf) = &self.when_false {
            obj.insert("else".into(), wf.to_spec_json(requirements));
        }
        Json::Object(obj)
    }
}
