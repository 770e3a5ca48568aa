//! The requirements document: a JSON object describing the project name,
//! its goal list, and optionally the branch the current work targets.

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

/// Parse the requirements document. A JSON syntax error is a hard parse
/// failure; unknown fields are tolerated so the agent can extend the
/// document without breaking the loop.
pub fn parse(text: &str) -> Result<Requirements> {
    serde_json::from_str(text)
        .map_err(|e| DroverError::Artifact(format!("requirements parse error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let req = parse(
            r#"{"projectName": "drover", "goals": ["ship it", "test it"], "branchName": "main"}"#,
        )
        .unwrap();
        assert_eq!(req.project_name.as_deref(), Some("drover"));
        assert_eq!(req.goals.len(), 2);
        assert_eq!(req.branch_name.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_missing_fields_defaults() {
        let req = parse("{}").unwrap();
        assert!(req.project_name.is_none());
        assert!(req.goals.is_empty());
        assert!(req.branch_name.is_none());
    }

    #[test]
    fn test_parse_tolerates_unknown_fields() {
        let req = parse(r#"{"projectName": "x", "goals": [], "notes": "extra"}"#).unwrap();
        assert_eq!(req.project_name.as_deref(), Some("x"));
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        let err = parse("{not json").unwrap_err();
        assert!(err.to_string().contains("requirements parse error"));
    }
}
