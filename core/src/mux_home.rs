//! Resolution of `~/.mux` (or `$MUX_HOME`), mirroring codex-core's
//! `find_codex_home`/`codex_home` (spec.md SPEC_FULL §1/§3 "MuxHome").
//! Workspace metadata persists as one TOML document per workspace under
//! `<mux_home>/workspaces/<id>.toml`, written through the same
//! write-to-temp-then-rename path runtimes use for their own file I/O.

use std::io;
use std::path::PathBuf;

const WORKSPACES_SUBDIR: &str = "workspaces";

/// Honors `MUX_HOME` when set (non-empty); otherwise `~/.mux`.
pub fn find_mux_home() -> io::Result<PathBuf> {
    if let Ok(val) = std::env::var("MUX_HOME") {
        if !val.is_empty() {
            return Ok(PathBuf::from(val));
        }
    }
    let mut home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not find home directory"))?;
    home.push(".mux");
    Ok(home)
}

/// Path to the per-workspace metadata file: `<mux_home>/workspaces/<id>.toml`.
pub fn workspace_metadata_path(mux_home: &std::path::Path, workspace_id: &str) -> PathBuf {
    mux_home.join(WORKSPACES_SUBDIR).join(format!("{workspace_id}.toml"))
}

/// Path to the directory holding every persisted workspace's metadata.
pub fn workspaces_dir(mux_home: &std::path::Path) -> PathBuf {
    mux_home.join(WORKSPACES_SUBDIR)
}

/// Path to a workspace's append-only history log:
/// `<mux_home>/workspaces/<id>/history.jsonl` (spec.md §6/§9 "the file lock
/// is per-workspace").
pub fn workspace_history_path(mux_home: &std::path::Path, workspace_id: &str) -> PathBuf {
    mux_home.join(WORKSPACES_SUBDIR).join(workspace_id).join("history.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    #[serial]
    fn mux_home_env_override_takes_precedence() {
        unsafe {
            std::env::set_var("MUX_HOME", "/tmp/custom-mux-home");
        }
        assert_eq!(find_mux_home().unwrap(), PathBuf::from("/tmp/custom-mux-home"));
        unsafe {
            std::env::remove_var("MUX_HOME");
        }
    }

    #[test]
    fn workspace_metadata_path_is_namespaced_under_workspaces() {
        let path = workspace_metadata_path(std::path::Path::new("/home/alice/.mux"), "ws-1");
        assert_eq!(path, PathBuf::from("/home/alice/.mux/workspaces/ws-1.toml"));
    }

    #[test]
    fn workspace_history_path_is_one_file_per_workspace() {
        let path = workspace_history_path(std::path::Path::new("/home/alice/.mux"), "ws-1");
        assert_eq!(path, PathBuf::from("/home/alice/.mux/workspaces/ws-1/history.jsonl"));
    }
}
