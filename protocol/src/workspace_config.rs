use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Sub-configuration for an SSH workspace backed by a managed remote
/// workspace (e.g. a Coder workspace) rather than a bare host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRemoteConfig {
    pub workspace_name: String,
    pub template: String,
    #[serde(default)]
    pub preset: Option<String>,
    /// When true, this core must never create or destroy the remote
    /// workspace — only use it. Set on both sides of a `fork_workspace`.
    #[serde(default)]
    pub existing_workspace: bool,
}

/// Discriminated union of the ways a workspace's backing store can be
/// provisioned. Mirrors codex-core's tagged `config_types.rs` enums: an
/// explicit `type` discriminant rather than structural typing, so an
/// unrecognized future variant fails to deserialize instead of silently
/// matching the wrong arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceConfig {
    /// The workspace *is* the project directory; no worktree, no copy.
    Local { src_base_dir: String },
    /// A `git worktree` checked out under `src_base_dir`.
    Worktree { src_base_dir: String },
    Ssh {
        host: String,
        src_base_dir: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coder: Option<ManagedRemoteConfig>,
    },
    Container {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_name: Option<String>,
    },
}

impl WorkspaceConfig {
    /// `srcBaseDir` may contain `~`; it must be resolved before first use.
    /// Returns `None` for variants that have no `src_base_dir` (container).
    pub fn src_base_dir(&self) -> Option<&str> {
        match self {
            WorkspaceConfig::Local { src_base_dir }
            | WorkspaceConfig::Worktree { src_base_dir }
            | WorkspaceConfig::Ssh { src_base_dir, .. } => Some(src_base_dir),
            WorkspaceConfig::Container { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceConfig::Local { .. } => "local",
            WorkspaceConfig::Worktree { .. } => "worktree",
            WorkspaceConfig::Ssh { .. } => "ssh",
            WorkspaceConfig::Container { .. } => "container",
        }
    }
}

/// Expand a leading `~` or `~/...` to the user's home directory. Returns the
/// path unchanged if it doesn't start with `~`, or if the home directory
/// can't be determined.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs_home() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Textual path normalization against a base, without touching the
/// filesystem: resolves `.`/`..` components and makes relative paths
/// absolute against `base`. Does not resolve symlinks (that's `resolve_path`'s
/// job, which is runtime-specific and may require a remote round trip).
pub fn normalize_path(target: &str, base: &Path) -> PathBuf {
    let target_path = Path::new(target);
    let absolute = if target_path.is_absolute() {
        target_path.to_path_buf()
    } else {
        base.join(target_path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The single source of truth for where a workspace lives on disk, per
/// spec.md §4.1/§6: `{srcBaseDir}/{basename(projectPath)}/{workspaceName}`.
/// In-place workspaces use the project path directly; containers use a
/// fixed container-local path.
pub fn workspace_path(
    config: &WorkspaceConfig,
    project_path: &str,
    workspace_name: &str,
) -> PathBuf {
    match config {
        WorkspaceConfig::Local { .. } if workspace_name == project_path => {
            PathBuf::from(project_path)
        }
        WorkspaceConfig::Container { .. } => PathBuf::from("/src"),
        _ => {
            let base = config
                .src_base_dir()
                .map(expand_tilde)
                .unwrap_or_else(|| PathBuf::from("."));
            let project_basename = Path::new(project_path)
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| project_path.to_string());
            base.join(project_basename).join(workspace_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn expand_tilde_expands_home_prefix() {
        unsafe {
            std::env::set_var("HOME", "/home/alice");
        }
        assert_eq!(expand_tilde("~/code"), PathBuf::from("/home/alice/code"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn normalize_path_resolves_dotdot_without_touching_fs() {
        let base = Path::new("/work/proj");
        assert_eq!(
            normalize_path("../other/./x", base),
            PathBuf::from("/work/other/x")
        );
        assert_eq!(normalize_path("/abs/y", base), PathBuf::from("/abs/y"));
    }

    #[test]
    fn workspace_path_is_pure_and_depends_only_on_named_inputs() {
        let cfg = WorkspaceConfig::Worktree {
            src_base_dir: "/srv/work".to_string(),
        };
        let p1 = workspace_path(&cfg, "/home/alice/proj", "feature-a");
        let p2 = workspace_path(&cfg, "/other/path/proj", "feature-a");
        assert_eq!(p1, p2); // depends only on basename(project_path)
        assert_eq!(p1, PathBuf::from("/srv/work/proj/feature-a"));
    }

    #[test]
    fn container_workspace_path_is_fixed() {
        let cfg = WorkspaceConfig::Container {
            image: "ubuntu".to_string(),
            container_name: None,
        };
        assert_eq!(
            workspace_path(&cfg, "/anything", "whatever"),
            PathBuf::from("/src")
        );
    }

    #[test]
    fn in_place_sentinel_returns_project_path_directly() {
        let cfg = WorkspaceConfig::Local {
            src_base_dir: "/ignored".to_string(),
        };
        assert_eq!(
            workspace_path(&cfg, "/home/alice/proj", "/home/alice/proj"),
            PathBuf::from("/home/alice/proj")
        );
    }
}
