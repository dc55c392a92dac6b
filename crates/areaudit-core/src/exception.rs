//! Per-student exceptions declared by the registrar.

use serde_json::Value as Json;

use crate::error::{AuditError, Result};
use crate::path::RulePath;

/// An exception attaches to one rule path of one area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleException {
    /// The node at `path` audits as a waived pass.
    Override { path: RulePath },
    /// The course is made available to the rule at `path`. Forced
    /// insertions additionally bypass limit accounting.
    Insert {
        path: RulePath,
        clbid: String,
        forced: bool,
    },
}

impl RuleException {
    pub fn load(data: &Json) -> Result<RuleException> {
        let obj = data
            .as_object()
            .ok_or_else(|| AuditError::data(format!("expected an exception object, got {data}")))?;

        let path = obj
            .get("path")
            .and_then(Json::as_array)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .map(RulePath::from_segments)
            .ok_or_else(|| AuditError::data("exception is missing its path"))?;

        match obj.get("type").and_then(Json::as_str) {
            Some("override") => Ok(RuleException::Override { path }),
            Some("insert") => {
                let clbid = obj
                    .get("clbid")
                    .and_then(Json::as_str)
                    .ok_or_else(|| AuditError::data("insert exception is missing its clbid"))?
                    .to_string();
                Ok(RuleException::Insert {
                    path,
                    clbid,
                    forced: obj.get("forced").and_then(Json::as_bool).unwrap_or(false),
                })
            }
            other => Err(AuditError::data(format!("unknown exception type {other:?}"))),
        }
    }

    pub fn path(&self) -> &RulePath {
        match self {
            RuleException::Override { path } => path,
            RuleException::Insert { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_an_override() {
        let e = RuleException::load(&json!({
            "type": "override", "path": ["$", ".count", "[0]"],
        }))
        .unwrap();
        assert_eq!(
            e,
            RuleException::Override {
                path: RulePath::from_segments(vec!["$".into(), ".count".into(), "[0]".into()]),
            }
        );
    }

    #[test]
    fn load_a_forced_insertion() {
        let e = RuleException::load(&json!({
            "type": "insert", "path": ["$"], "clbid": "123", "forced": true,
        }))
        .unwrap();
        match e {
            RuleException::Insert { clbid, forced, .. } => {
                assert_eq!(clbid, "123");
                assert!(forced);
            }
            other => panic!("expected an insertion, got {other:?}"),
        }
    }

    #[test]
    fn unknown_exception_types_are_data_errors() {
        let err = RuleException::load(&json!({"type": "waive-gpa", "path": ["$"]})).unwrap_err();
        assert!(matches!(err, AuditError::Data(_)));
    }
}
