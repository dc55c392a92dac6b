//! Named requirements.
//!
//! A `{requirement: Name}` reference resolves against the enclosing
//! `requirements` map; the definition supplies the message, the child rule,
//! and the external-audit flags.

use serde_json::{json, Map, Value as Json};

use areaudit_core::{AuditError, Constants, Result, RulePath};

use crate::context::SolveContext;
use crate::rule::Rule;
use crate::solution::{RequirementSolution, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditedBy {
    Department,
    Registrar,
}

impl AuditedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditedBy::Department => "department",
            AuditedBy::Registrar => "registrar",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequirementRule {
    pub name: String,
    pub message: Option<String>,
    pub result: Option<Box<Rule>>,
    pub audited_by: Option<AuditedBy>,
    pub is_contract: bool,
    pub optional: bool,
    pub path: RulePath,
}

impl RequirementRule {
    /// Load from a `{requirement: Name}` reference plus the local
    /// definitions map.
    pub fn load(
        data: &Json,
        children: &Map<String, Json>,
        c: &Constants,
        path: &RulePath,
    ) -> Result<RequirementRule> {
        let obj = data.as_object().ok_or_else(|| {
            AuditError::specification(path, format!("expected {data} to be a mapping"))
        })?;

        let name = obj
            .get("requirement")
            .and_then(Json::as_str)
            .ok_or_else(|| AuditError::specification(path, "requirement reference needs a name"))?;

        let definition = children.get(name).ok_or_else(|| {
            AuditError::specification(path, format!("unresolved requirement reference {name:?}"))
        })?;

        Self::load_definition(name, definition, c, path)
    }

    pub fn load_definition(
        name: &str,
        definition: &Json,
        c: &Constants,
        parent: &RulePath,
    ) -> Result<RequirementRule> {
        let path = parent.requirement(name);

        let obj = definition.as_object().ok_or_else(|| {
            AuditError::specification(&path, format!("expected {definition} to be a mapping"))
        })?;

        let allowed = [
            "message",
            "result",
            "requirements",
            "department_audited",
            "department-audited",
            "registrar_audited",
            "registrar-audited",
            "contract",
            "optional",
        ];
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(AuditError::specification(
                    &path,
                    format!("unexpected key {key:?} in requirement {name:?}"),
                ));
            }
        }

        let flag = |keys: &[&str]| {
            keys.iter()
                .any(|k| obj.get(*k).and_then(Json::as_bool).unwrap_or(false))
        };
        let audited_by = if flag(&["department_audited", "department-audited"]) {
            Some(AuditedBy::Department)
        } else if flag(&["registrar_audited", "registrar-audited"]) {
            Some(AuditedBy::Registrar)
        } else {
            None
        };

        // nested references resolve against this requirement's own children
        let empty = Map::new();
        let nested = obj
            .get("requirements")
            .and_then(Json::as_object)
            .unwrap_or(&empty);

        let result = obj
            .get("result")
            .map(|r| Rule::load(r, nested, c, &path.child(".result")).map(Box::new))
            .transpose()?;

        if result.is_none() && audited_by.is_none() && !flag(&["optional"]) {
            tracing::debug!(%path, "requirement {name:?} has no result and is not audited");
        }

        Ok(RequirementRule {
            name: name.to_string(),
            message: obj.get("message").and_then(Json::as_str).map(str::to_string),
            result,
            audited_by,
            is_contract: obj.get("contract").and_then(Json::as_bool).unwrap_or(false),
            optional: obj.get("optional").and_then(Json::as_bool).unwrap_or(false),
            path,
        })
    }

    pub fn solutions<'r>(&'r self, ctx: &SolveContext) -> Box<dyn Iterator<Item = Solution> + 'r> {
        let waived = self.audited_by.is_some() || ctx.is_overridden(&self.path);

        let result = match &self.result {
            Some(result) if !waived => result,
            _ => {
                return Box::new(std::iter::once(Solution::Requirement(RequirementSolution {
                    rule: self.without_result(),
                    overridden: ctx.is_overridden(&self.path),
                    result: None,
                })))
            }
        };

        Box::new(result.solutions(ctx).map(move |solution| {
            Solution::Requirement(RequirementSolution {
                rule: self.without_result(),
                overridden: false,
                result: Some(Box::new(solution)),
            })
        }))
    }

    pub fn estimate(&self, ctx: &SolveContext) -> u64 {
        if self.audited_by.is_some() || ctx.is_overridden(&self.path) {
            return 1;
        }
        self.result.as_ref().map_or(1, |r| r.estimate(ctx))
    }

    /// A shallow copy for embedding in solutions and results, without the
    /// (potentially large) child rule.
    pub fn without_result(&self) -> RequirementRule {
        RequirementRule {
            name: self.name.clone(),
            message: self.message.clone(),
            result: None,
            audited_by: self.audited_by,
            is_contract: self.is_contract,
            optional: self.optional,
            path: self.path.clone(),
        }
    }

    pub fn to_spec_json(&self, requirements: &mut Map<String, Json>) -> Json {
        let mut definition = Map::new();
        if let Some(m) = &self.message {
            definition.insert("message".into(), json!(m));
        }
        match self.audited_by {
            Some(AuditedBy::Department) => {
                definition.insert("department_audited".into(), json!(true));
            }
            Some(AuditedBy::Registrar) => {
                definition.insert("registrar_audited".into(), json!(true));
            }
            None => {}
        }
        if self.is_contract {
            definition.insert("contract".into(), json!(true));
        }
        if self.optional {
            definition.insert("optional".into(), json!(true));
        }
        if let Some(result) = &self.result {
            let mut nested = Map::new();
            let result_json = result.to_spec_json(&mut nested);
            if !nested.is_empty() {
                definition.insert("requirements".into(), Json::Object(nested));
            }
            definition.insert("result".into(), result_json);
        }

        requirements.insert(self.name.clone(), Json::Object(definition));
        json!({"requirement": self.name})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn children(data: Json) -> Map<String, Json> {
        data.as_object().unwrap().clone()
    }

    #[test]
    fn references_resolve_against_the_definitions_map() {
        let defs = children(json!({
            "Core": {"message": "take the core", "result": {"course": "CSCI 121"}},
        }));
        let rule = RequirementRule::load(
            &json!({"requirement": "Core"}),
            &defs,
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap();

        assert_eq!(rule.name, "Core");
        assert_eq!(rule.message.as_deref(), Some("take the core"));
        assert_eq!(rule.path.segments(), &["$", "$req->Core"]);
        assert!(rule.result.is_some());
    }

    #[test]
    fn unresolved_references_are_specification_errors() {
        let err = RequirementRule::load(
            &json!({"requirement": "Missing"}),
            &Map::new(),
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::Specification { .. }));
    }

    #[test]
    fn registrar_audited_requirements_carry_the_flag() {
        let defs = children(json!({
            "Outside": {"message": "audited externally", "registrar_audited": true},
        }));
        let rule = RequirementRule::load(
            &json!({"requirement": "Outside"}),
            &defs,
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap();
        assert_eq!(rule.audited_by, Some(AuditedBy::Registrar));
        assert!(rule.result.is_none());
    }

    #[test]
    fn nested_requirements_resolve_locally() {
        let defs = children(json!({
            "Outer": {
                "requirements": {
                    "Inner": {"result": {"course": "ART 101"}},
                },
                "result": {"count": 1, "of": [{"requirement": "Inner"}]},
            },
        }));
        let rule = RequirementRule::load(
            &json!({"requirement": "Outer"}),
            &defs,
            &Constants::default(),
            &RulePath::root(),
        )
        .unwrap();

        let names = Rule::Requirement(rule).requirement_names();
        assert_eq!(names, vec!["Outer".to_string(), "Inner".to_string()]);
    }
}
