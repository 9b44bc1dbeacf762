use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mux_protocol::Result;

use crate::exec::{ExecOptions, ExecStream, Stat};
use crate::init_logger::InitLogger;

/// Options accepted by [`Runtime::create_workspace`]. Fast-path only — no
/// agent I/O, no network calls that can hang; slow setup belongs in
/// `init_workspace` (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct CreateWorkspaceOptions {
    pub project_path: PathBuf,
    pub workspace_name: String,
    pub trunk_branch: Option<String>,
}

/// Options accepted by [`Runtime::delete_workspace`]. `force` is the single
/// authoritative escalation switch — runtimes MUST NOT self-escalate to a
/// forced deletion the caller didn't ask for.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteWorkspaceOptions {
    pub force: bool,
}

/// Options accepted by [`Runtime::fork_workspace`].
#[derive(Debug, Clone)]
pub struct ForkWorkspaceOptions {
    pub source_workspace_name: String,
    pub new_workspace_name: String,
}

/// Uniform operation surface over a workspace's execution environment,
/// whatever backs it — a local directory/worktree, an SSH host, or a
/// container (spec.md §4.1).
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes `contents` to `path` atomically: write to a sibling
    /// `<path>.tmp.<epoch>` then rename over the target. Parent directories
    /// are created on demand.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    async fn stat(&self, path: &Path) -> Result<Stat>;

    /// Expands `~` and resolves relative paths against a runtime-defined
    /// base, returning an absolute canonical path. For remote runtimes this
    /// is a remote shell expansion, not a local filesystem lookup.
    async fn resolve_path(&self, path: &str) -> Result<PathBuf>;

    /// Textual normalization of `target` against `base` — no filesystem
    /// access, so safe to call for paths that don't exist yet.
    fn normalize_path(&self, target: &str, base: &Path) -> PathBuf;

    /// The single source of truth for where a workspace lives:
    /// `{srcBaseDir}/{basename(projectPath)}/{workspaceName}` for the
    /// common case, the project path itself for in-place workspaces, the
    /// fixed container path for containers.
    fn workspace_path(&self, project_path: &Path, workspace_name: &str) -> PathBuf;

    async fn create_workspace(&self, opts: CreateWorkspaceOptions) -> Result<PathBuf>;

    async fn init_workspace(&self, workspace_path: &Path, logger: &dyn InitLogger) -> Result<()>;

    /// Containers return `MuxError::UnsupportedOperation` unconditionally
    /// (spec.md Open Question (c)).
    async fn rename_workspace(&self, old_path: &Path, new_name: &str) -> Result<PathBuf>;

    async fn delete_workspace(&self, workspace_path: &Path, opts: DeleteWorkspaceOptions) -> Result<()>;

    async fn fork_workspace(&self, opts: ForkWorkspaceOptions) -> Result<PathBuf>;

    /// Blocks (bounded by a caller-supplied timeout) until the runtime is
    /// ready to accept `exec` calls — e.g. waiting for an SSH host or a
    /// managed remote to finish booting. Local runtimes return immediately.
    async fn ensure_ready(&self, timeout: std::time::Duration) -> Result<()>;

    fn temp_dir(&self) -> PathBuf;

    fn mux_home(&self) -> PathBuf;
}
