//! In-place and git-worktree backed local runtime (spec.md §4.1 "Local
//! variant"). Grounded on `codex-rs/core/src/git_worktree.rs`'s
//! `setup_worktree` (reuse-existing, retry-on-`already exists`) and
//! `exec.rs`'s process-group spawn/kill shape.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use mux_protocol::{workspace_path, MuxError, Result};
use tokio::process::Command;

use crate::atomic_write::atomic_write_local;
use crate::exec::{ExecOptions, ExecStream, Stat};
use crate::init_logger::InitLogger;
use crate::trait_def::{
    CreateWorkspaceOptions, DeleteWorkspaceOptions, ForkWorkspaceOptions, Runtime,
};

/// Whether a `LocalRuntime` manages the project directory itself, or a
/// worktree branched off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMode {
    InPlace,
    Worktree,
}

pub struct LocalRuntime {
    pub src_base_dir: PathBuf,
    pub mux_home: PathBuf,
    pub mode: LocalMode,
}

impl LocalRuntime {
    pub fn new(src_base_dir: PathBuf, mux_home: PathBuf, mode: LocalMode) -> Self {
        Self { src_base_dir, mux_home, mode }
    }

    async fn run_git(&self, cwd: &Path, args: &[&str]) -> std::result::Result<std::process::Output, String> {
        Command::new("git")
            .current_dir(cwd)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("git {}: {e}", args.join(" ")))
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream> {
        spawn_process_group(command, opts).await
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| MuxError::file_io(format!("read {}: {e}", path.display())))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        atomic_write_local(path, contents).await
    }

    async fn stat(&self, path: &Path) -> Result<Stat> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| MuxError::file_io(format!("stat {}: {e}", path.display())))?;
        Ok(Stat {
            size: meta.len(),
            modified_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_directory: meta.is_dir(),
        })
    }

    async fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let expanded = mux_protocol::expand_tilde(path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.src_base_dir.join(expanded)
        };
        match tokio::fs::canonicalize(&joined).await {
            Ok(canonical) => Ok(canonical),
            Err(_) => Ok(joined),
        }
    }

    fn normalize_path(&self, target: &str, base: &Path) -> PathBuf {
        mux_protocol::normalize_path(target, base)
    }

    fn workspace_path(&self, project_path: &Path, workspace_name: &str) -> PathBuf {
        let config = match self.mode {
            LocalMode::InPlace => mux_protocol::WorkspaceConfig::Local {
                src_base_dir: self.src_base_dir.to_string_lossy().to_string(),
            },
            LocalMode::Worktree => mux_protocol::WorkspaceConfig::Worktree {
                src_base_dir: self.src_base_dir.to_string_lossy().to_string(),
            },
        };
        workspace_path(&config, &project_path.to_string_lossy(), workspace_name)
    }

    async fn create_workspace(&self, opts: CreateWorkspaceOptions) -> Result<PathBuf> {
        let target = self.workspace_path(&opts.project_path, &opts.workspace_name);
        if self.mode == LocalMode::InPlace {
            return Ok(target);
        }

        if target.exists() {
            return Ok(target);
        }

        let mut branch = opts.workspace_name.clone();
        let mut worktree_path = target.clone();
        let add = self
            .run_git(
                &opts.project_path,
                &["worktree", "add", "-b", &branch, worktree_path.to_str().unwrap_or_default()],
            )
            .await
            .map_err(MuxError::exec)?;

        if !add.status.success() {
            let stderr = String::from_utf8_lossy(&add.stderr);
            if stderr.contains("already exists") {
                branch = format!("{branch}-{}", std::process::id());
                worktree_path = worktree_path
                    .parent()
                    .map(|p| p.join(&branch))
                    .unwrap_or(worktree_path);
                let retry = self
                    .run_git(
                        &opts.project_path,
                        &["worktree", "add", "-b", &branch, worktree_path.to_str().unwrap_or_default()],
                    )
                    .await
                    .map_err(MuxError::exec)?;
                if !retry.status.success() {
                    return Err(MuxError::exec(format!(
                        "git worktree add (retry): {}",
                        String::from_utf8_lossy(&retry.stderr)
                    )));
                }
            } else {
                return Err(MuxError::exec(format!("git worktree add: {stderr}")));
            }
        }

        Ok(worktree_path)
    }

    async fn init_workspace(&self, _workspace_path: &Path, logger: &dyn InitLogger) -> Result<()> {
        logger.log("local workspace ready");
        Ok(())
    }

    async fn rename_workspace(&self, old_path: &Path, new_name: &str) -> Result<PathBuf> {
        let new_path = old_path
            .parent()
            .map(|p| p.join(new_name))
            .ok_or_else(|| MuxError::file_io("workspace path has no parent"))?;
        tokio::fs::rename(old_path, &new_path)
            .await
            .map_err(|e| MuxError::file_io(format!("rename {} -> {}: {e}", old_path.display(), new_path.display())))?;
        Ok(new_path)
    }

    async fn delete_workspace(&self, workspace_path: &Path, opts: DeleteWorkspaceOptions) -> Result<()> {
        if self.mode == LocalMode::InPlace {
            return Err(MuxError::UnsupportedOperation(
                "in-place workspaces cannot be deleted".to_string(),
            ));
        }

        let mut args = vec!["worktree", "remove"];
        if opts.force {
            args.push("--force");
        }
        args.push(workspace_path.to_str().unwrap_or_default());
        let repo_root = workspace_path
            .parent()
            .and_then(Path::parent)
            .unwrap_or(&self.src_base_dir);
        let output = self.run_git(repo_root, &args).await.map_err(MuxError::exec)?;
        if !output.status.success() {
            if opts.force {
                let _ = self.run_git(repo_root, &["worktree", "prune"]).await;
                tokio::fs::remove_dir_all(workspace_path)
                    .await
                    .map_err(|e| MuxError::file_io(format!("remove_dir_all: {e}")))?;
            } else {
                return Err(MuxError::exec(format!(
                    "git worktree remove: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
        }
        Ok(())
    }

    async fn fork_workspace(&self, opts: ForkWorkspaceOptions) -> Result<PathBuf> {
        let source = self.src_base_dir.join(&opts.source_workspace_name);
        let fork_path = self.src_base_dir.join(&opts.new_workspace_name);
        let output = self
            .run_git(
                &source,
                &["worktree", "add", "-b", &opts.new_workspace_name, fork_path.to_str().unwrap_or_default()],
            )
            .await
            .map_err(MuxError::exec)?;
        if !output.status.success() {
            return Err(MuxError::exec(format!(
                "git worktree add (fork): {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(fork_path)
    }

    async fn ensure_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn mux_home(&self) -> PathBuf {
        self.mux_home.clone()
    }
}

/// Spawns `command` as a detached process-group leader under `bash -c`, so
/// a single group kill cleans up any children it spawns (spec.md §4.1).
/// Grounded on `codex-rs/core/src/exec.rs`'s `KillOnDrop`/process-group-kill
/// pattern, adapted to resolve to the sentinel exit codes on abort/timeout
/// instead of propagating a `tokio::signal::ctrl_c` race.
pub(crate) async fn spawn_process_group(command: &str, opts: ExecOptions) -> Result<ExecStream> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    cmd.current_dir(&opts.cwd);
    cmd.envs(mux_protocol::noninteractive_env());
    cmd.envs(&opts.env);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| MuxError::exec(format!("spawn: {e}")))?;

    let stdout = child.stdout.take().ok_or_else(|| MuxError::exec("missing stdout pipe"))?;
    let stderr = child.stderr.take().ok_or_else(|| MuxError::exec("missing stderr pipe"))?;
    let stdin = child.stdin.take().ok_or_else(|| MuxError::exec("missing stdin pipe"))?;

    let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();
    let (duration_tx, duration_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let pid = child.id();

        let wait_fut = child.wait();
        let settled = match (opts.timeout, opts.abort) {
            (Some(timeout), Some(mut abort)) => {
                tokio::select! {
                    status = tokio::time::timeout(timeout, wait_fut) => {
                        match status {
                            Ok(Ok(s)) => s.code().unwrap_or(mux_protocol::exit_codes::SIGTERM),
                            _ => {
                                kill_process_group(pid);
                                mux_protocol::exit_codes::TIMEOUT
                            }
                        }
                    }
                    _ = abort.changed() => {
                        if *abort.borrow() {
                            kill_process_group(pid);
                            mux_protocol::exit_codes::ABORTED
                        } else {
                            match child.wait().await {
                                Ok(s) => s.code().unwrap_or(mux_protocol::exit_codes::SIGTERM),
                                Err(_) => mux_protocol::exit_codes::ABORTED,
                            }
                        }
                    }
                }
            }
            (Some(timeout), None) => match tokio::time::timeout(timeout, wait_fut).await {
                Ok(Ok(s)) => s.code().unwrap_or(mux_protocol::exit_codes::SIGTERM),
                _ => {
                    kill_process_group(pid);
                    mux_protocol::exit_codes::TIMEOUT
                }
            },
            (None, Some(mut abort)) => {
                tokio::select! {
                    status = wait_fut => status.ok().and_then(|s| s.code()).unwrap_or(mux_protocol::exit_codes::SIGTERM),
                    _ = abort.changed() => {
                        kill_process_group(pid);
                        mux_protocol::exit_codes::ABORTED
                    }
                }
            }
            (None, None) => wait_fut.await.ok().and_then(|s| s.code()).unwrap_or(mux_protocol::exit_codes::SIGTERM),
        };

        let _ = exit_tx.send(settled);
        let _ = duration_tx.send(started.elapsed());
    });

    Ok(ExecStream {
        stdout: Box::new(stdout),
        stderr: Box::new(stderr),
        stdin: Box::new(stdin),
        exit_code: exit_rx,
        duration: duration_rx,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn exec_runs_and_reports_exit_code() {
        let opts = ExecOptions {
            cwd: std::env::temp_dir(),
            ..Default::default()
        };
        let stream = spawn_process_group("exit 7", opts).await.unwrap();
        let code = stream.exit_code.await.unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn exec_times_out_with_sentinel_code() {
        let opts = ExecOptions {
            cwd: std::env::temp_dir(),
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let stream = spawn_process_group("sleep 5", opts).await.unwrap();
        let code = stream.exit_code.await.unwrap();
        assert_eq!(code, mux_protocol::exit_codes::TIMEOUT);
    }

    #[tokio::test]
    async fn exec_aborts_with_sentinel_code() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let opts = ExecOptions {
            cwd: std::env::temp_dir(),
            abort: Some(rx),
            ..Default::default()
        };
        let stream = spawn_process_group("sleep 5", opts).await.unwrap();
        tx.send(true).unwrap();
        let code = stream.exit_code.await.unwrap();
        assert_eq!(code, mux_protocol::exit_codes::ABORTED);
    }
}
