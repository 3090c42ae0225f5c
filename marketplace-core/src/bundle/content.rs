//! Rule type and profile documents shipped inside bundles

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_version() -> String {
    "v1".to_string()
}

fn default_entity() -> String {
    "repository".to_string()
}

/// How serious a failure of a rule type is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A reusable policy definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleType {
    #[serde(default = "default_version")]
    pub version: String,

    /// Name the rule type is addressed by inside a project
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub guidance: String,

    #[serde(default)]
    pub severity: Severity,

    /// Evaluation definition, kept opaque
    #[serde(default)]
    pub def: serde_json::Value,
}

/// A rule inside a profile, referencing a rule type by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRule {
    #[serde(rename = "type")]
    pub rule_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Entity the rule applies to
    #[serde(default = "default_entity")]
    pub entity: String,

    /// Parameters for the rule type
    #[serde(default)]
    pub def: serde_json::Value,
}

/// A configuration that selects and parameterizes rule types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    #[serde(default)]
    pub rules: Vec<ProfileRule>,
}

impl Profile {
    /// Distinct rule type names the profile depends on
    pub fn rule_type_names(&self) -> BTreeSet<&str> {
        self.rules.iter().map(|r| r.rule_type.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_from_yaml() {
        let yaml = r#"
name: secret_scanning
display_name: Enable secret scanning
description: Verifies that secret scanning is enabled
severity: high
def:
  in_entity: repository
  rule_schema:
    type: object
"#;
        let rule_type: RuleType = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(rule_type.version, "v1");
        assert_eq!(rule_type.name, "secret_scanning");
        assert_eq!(rule_type.severity, Severity::High);
        assert_eq!(rule_type.def["in_entity"], "repository");
    }

    #[test]
    fn test_profile_rule_type_names() {
        let yaml = r#"
name: healthcheck
rules:
  - type: secret_scanning
  - type: branch_protection
    def:
      branch: main
  - type: secret_scanning
    name: secret_scanning_again
"#;
        let profile: Profile = serde_yaml_ng::from_str(yaml).unwrap();
        let names: Vec<_> = profile.rule_type_names().into_iter().collect();
        assert_eq!(names, vec!["branch_protection", "secret_scanning"]);
        assert_eq!(profile.rules[0].entity, "repository");
    }
}
