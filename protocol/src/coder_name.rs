//! Derivation of a managed-remote (Coder) workspace name from an internal
//! mux workspace name, per spec.md §6/§8 scenario 1.

use regex_lite::Regex;
use std::sync::OnceLock;

fn coder_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]+(?:-[a-zA-Z0-9]+)*$").expect("valid regex")
    })
}

/// Convert an internal workspace name into a valid Coder workspace name:
/// underscores become hyphens, leading/trailing hyphens are trimmed, and
/// runs of hyphens collapse to one. Fails if the result doesn't satisfy
/// Coder's naming grammar.
pub fn derive_coder_workspace_name(internal_name: &str) -> Result<String, String> {
    let hyphenated: String = internal_name
        .chars()
        .map(|c| if c == '_' { '-' } else { c })
        .collect();

    let mut collapsed = String::with_capacity(hyphenated.len());
    let mut last_dash = false;
    for c in hyphenated.chars() {
        if c == '-' {
            if !last_dash {
                collapsed.push('-');
            }
            last_dash = true;
        } else {
            collapsed.push(c);
            last_dash = false;
        }
    }
    let trimmed = collapsed.trim_matches('-').to_string();

    if coder_name_pattern().is_match(&trimmed) {
        Ok(trimmed)
    } else {
        Err(format!(
            "\"{internal_name}\" cannot be converted to a valid Coder name"
        ))
    }
}

/// The SSH host mux connects to for a Coder-managed workspace.
pub fn coder_host(workspace_name: &str) -> String {
    format!("{workspace_name}.coder")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn underscore_branch_becomes_hyphenated_name() {
        let name = derive_coder_workspace_name("my_feature_branch").unwrap();
        assert_eq!(name, "my-feature-branch");
        assert_eq!(coder_host(&name), "my-feature-branch.coder");
    }

    #[test]
    fn all_dashes_fails_with_explicit_message() {
        let err = derive_coder_workspace_name("---").unwrap_err();
        assert!(err.contains("cannot be converted to a valid Coder name"));
        assert!(err.contains("---"));
    }

    #[test]
    fn collapses_runs_and_trims_edges() {
        assert_eq!(
            derive_coder_workspace_name("__foo___bar__").unwrap(),
            "foo-bar"
        );
    }
}
