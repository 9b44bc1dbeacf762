use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::workspace_config::WorkspaceConfig;

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,62}$").expect("valid regex"))
}

/// Validates a workspace name against spec.md §3's identity invariant:
/// `^[a-z0-9][a-z0-9_-]{0,62}$`.
pub fn is_valid_workspace_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Per-workspace metadata record. `id` is globally unique; `(project_path,
/// name)` is unique within the local mux (enforced by `WorkspaceService`,
/// not this type, since this type has no notion of "all other workspaces").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub id: String,
    pub name: String,
    pub project_name: String,
    pub project_path: String,
    pub runtime_config: WorkspaceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_settings: Option<AiSettings>,
}

impl WorkspaceMetadata {
    /// The in-place sentinel: an in-place workspace's `project_path` equals
    /// its `name`.
    pub fn is_in_place(&self) -> bool {
        self.project_path == self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for n in ["a", "a0", "feature-123", "my_workspace"] {
            assert!(is_valid_workspace_name(n), "{n} should be valid");
        }
    }

    #[test]
    fn invalid_names() {
        for n in ["", "-start", "Has-Caps", "a".repeat(64).as_str(), "_start"] {
            assert!(!is_valid_workspace_name(n), "{n} should be invalid");
        }
    }
}
