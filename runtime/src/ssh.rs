//! SSH-backed runtime variant (spec.md §4.1 "SSH variant"). Every operation
//! shells out to the system `ssh` binary with multiplexing enabled so many
//! logical calls share one TCP connection, and every call first goes
//! through `mux-ssh`'s [`ConnectionPool`] so a flaky host fails fast instead
//! of stacking up redundant connection attempts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mux_protocol::quoting::{posix_quote, tilde_expand_ssh};
use mux_protocol::{workspace_path, ManagedRemoteConfig, MuxError, Result, WorkspaceConfig};
use mux_ssh::{multiplex_socket_path, ConnectionPool, PoolError, Target};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::exec::{ExecOptions, ExecStream, Stat};
use crate::init_logger::InitLogger;
use crate::trait_def::{CreateWorkspaceOptions, DeleteWorkspaceOptions, ForkWorkspaceOptions, Runtime};

/// Lines streamed back while a managed-remote workspace is being created or
/// started, forwarded to the caller's [`InitLogger`].
#[async_trait]
pub trait ManagedRemoteControlPlane: Send + Sync {
    async fn create_workspace(&self, cfg: &ManagedRemoteConfig, logger: &dyn InitLogger) -> Result<()>;
    async fn start_and_wait(&self, workspace_name: &str, timeout: Duration, logger: &dyn InitLogger) -> Result<()>;
    async fn delete_workspace(&self, workspace_name: &str) -> Result<()>;
}

/// Bundles the pieces `post_create_setup` needs for a Coder-backed (or
/// similar managed-remote) SSH workspace.
///
/// `existing_workspace` starts out mirroring `config.existing_workspace` but
/// is tracked separately, in an `AtomicBool`, because forking observably
/// mutates it (spec.md §4.1 "On fork: mark both source and fork as
/// existingWorkspace so neither can destroy the shared remote") while
/// `config` itself stays the value this runtime was constructed with.
pub struct ManagedRemoteSetup {
    pub config: ManagedRemoteConfig,
    pub control_plane: Arc<dyn ManagedRemoteControlPlane>,
    existing_workspace: AtomicBool,
}

impl ManagedRemoteSetup {
    pub fn new(config: ManagedRemoteConfig, control_plane: Arc<dyn ManagedRemoteControlPlane>) -> Self {
        let existing_workspace = AtomicBool::new(config.existing_workspace);
        Self { config, control_plane, existing_workspace }
    }

    fn is_existing_workspace(&self) -> bool {
        self.existing_workspace.load(Ordering::SeqCst)
    }

    /// Marks the remote as pre-existing so neither this workspace nor any
    /// fork of it tears it down on delete. A git worktree fork shares the
    /// same managed remote as its source, so this flag is shared between
    /// both once either side forks.
    fn mark_existing_workspace(&self) {
        self.existing_workspace.store(true, Ordering::SeqCst);
    }
}

pub struct SshRuntime {
    pub host: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub src_base_dir: PathBuf,
    pub mux_home: PathBuf,
    pub connect_timeout: Duration,
    pool: Arc<ConnectionPool>,
    managed_remote: Option<ManagedRemoteSetup>,
    local_user: String,
}

impl SshRuntime {
    pub fn new(
        host: String,
        port: u16,
        identity_file: Option<String>,
        src_base_dir: PathBuf,
        mux_home: PathBuf,
        pool: Arc<ConnectionPool>,
        managed_remote: Option<ManagedRemoteSetup>,
    ) -> Self {
        Self {
            host,
            port,
            identity_file,
            src_base_dir,
            mux_home,
            connect_timeout: Duration::from_secs(10),
            pool,
            managed_remote,
            local_user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    fn target(&self) -> Target {
        Target {
            local_user: self.local_user.clone(),
            host: self.host.clone(),
            port: self.port,
            identity_file: self.identity_file.clone(),
        }
    }

    /// The multiplexing options shared by every `ssh` invocation against
    /// this host (spec.md §4.1): `ControlMaster=auto`, a deterministic
    /// `ControlPath`, `ControlPersist=60`, a bounded `ConnectTimeout`, and
    /// keepalive so idle-but-open connections aren't silently dropped.
    fn ssh_args(&self) -> Vec<String> {
        let socket = multiplex_socket_path(&self.target());
        let mut args = vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", socket.display()),
            "-o".to_string(),
            "ControlPersist=60".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    async fn ensure_connection(&self) -> Result<()> {
        self.pool
            .acquire_connection(&self.target())
            .await
            .map_err(pool_err_to_mux)
    }

    /// Runs `remote_command` over `ssh`, non-interactively, reporting the
    /// outcome back to the pool (exit code 255 is a reliable transport
    /// failure signal per spec.md §4.2).
    async fn run_remote(&self, remote_command: &str) -> Result<(i32, Vec<u8>, Vec<u8>)> {
        self.ensure_connection().await?;

        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args());
        cmd.arg(&self.host);
        cmd.arg("--");
        cmd.arg(remote_command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| MuxError::network(format!("ssh exec failed to spawn: {e}")))?;

        let code = output.status.code().unwrap_or(-1);
        if code == 255 {
            self.pool
                .report_failure(&self.target(), "ssh exited 255 (transport failure)")
                .await;
        } else {
            self.pool.mark_healthy(&self.target()).await;
        }
        Ok((code, output.stdout, output.stderr))
    }

    async fn run_remote_ok(&self, remote_command: &str) -> Result<Vec<u8>> {
        let (code, stdout, stderr) = self.run_remote(remote_command).await?;
        if code != 0 {
            return Err(MuxError::exec(format!(
                "remote command failed ({code}): {}",
                String::from_utf8_lossy(&stderr)
            )));
        }
        Ok(stdout)
    }

    fn config(&self) -> WorkspaceConfig {
        WorkspaceConfig::Ssh {
            host: self.host.clone(),
            src_base_dir: self.src_base_dir.to_string_lossy().to_string(),
            identity_file: self.identity_file.clone(),
            port: Some(self.port),
            coder: self.managed_remote.as_ref().map(|m| ManagedRemoteConfig {
                existing_workspace: m.is_existing_workspace(),
                ..m.config.clone()
            }),
        }
    }

    /// Runs the managed-remote post-create sequence: create (or skip, if
    /// `existing_workspace`) via the control plane, then `mkdir -p` the
    /// workspace parent over SSH so the subsequent `git worktree`/clone
    /// lands somewhere real.
    async fn post_create_setup(&self, workspace_parent: &Path, logger: &dyn InitLogger) -> Result<()> {
        if let Some(managed) = &self.managed_remote {
            if !managed.is_existing_workspace() {
                managed.control_plane.create_workspace(&managed.config, logger).await?;
            }
            managed
                .control_plane
                .start_and_wait(&managed.config.workspace_name, Duration::from_secs(120), logger)
                .await?;
        }
        let quoted = posix_quote(&tilde_expand_ssh(&workspace_parent.to_string_lossy()));
        self.run_remote_ok(&format!("mkdir -p {quoted}")).await?;
        Ok(())
    }
}

fn pool_err_to_mux(err: PoolError) -> MuxError {
    MuxError::network(err.to_string())
}

#[async_trait]
impl Runtime for SshRuntime {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream> {
        self.ensure_connection().await?;

        let cwd_quoted = posix_quote(&tilde_expand_ssh(&opts.cwd.to_string_lossy()));
        let mut remote_script = format!("cd {cwd_quoted} && ");
        for (k, v) in &opts.env {
            remote_script.push_str(&format!("export {k}={} && ", posix_quote(v)));
        }
        remote_script.push_str(command);

        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args());
        cmd.arg(&self.host);
        cmd.arg("--");
        cmd.arg(&remote_script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| MuxError::exec(format!("ssh spawn: {e}")))?;
        let stdout = child.stdout.take().ok_or_else(|| MuxError::exec("missing stdout pipe"))?;
        let stderr = child.stderr.take().ok_or_else(|| MuxError::exec("missing stderr pipe"))?;
        let stdin = child.stdin.take().ok_or_else(|| MuxError::exec("missing stdin pipe"))?;

        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();
        let (duration_tx, duration_rx) = tokio::sync::oneshot::channel();
        let pool = self.pool.clone();
        let target = self.target();
        let timeout = opts.timeout;
        let abort = opts.abort;

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let wait_fut = child.wait();
            let code = match (timeout, abort) {
                (Some(timeout), Some(mut abort)) => {
                    tokio::select! {
                        status = tokio::time::timeout(timeout, wait_fut) => match status {
                            Ok(Ok(s)) => s.code().unwrap_or(mux_protocol::exit_codes::SIGTERM),
                            _ => { let _ = child.start_kill(); mux_protocol::exit_codes::TIMEOUT }
                        },
                        _ = abort.changed() => {
                            if *abort.borrow() {
                                let _ = child.start_kill();
                                mux_protocol::exit_codes::ABORTED
                            } else {
                                child.wait().await.ok().and_then(|s| s.code()).unwrap_or(mux_protocol::exit_codes::SIGTERM)
                            }
                        }
                    }
                }
                (Some(timeout), None) => match tokio::time::timeout(timeout, wait_fut).await {
                    Ok(Ok(s)) => s.code().unwrap_or(mux_protocol::exit_codes::SIGTERM),
                    _ => { let _ = child.start_kill(); mux_protocol::exit_codes::TIMEOUT }
                },
                (None, Some(mut abort)) => {
                    tokio::select! {
                        status = wait_fut => status.ok().and_then(|s| s.code()).unwrap_or(mux_protocol::exit_codes::SIGTERM),
                        _ = abort.changed() => { let _ = child.start_kill(); mux_protocol::exit_codes::ABORTED }
                    }
                }
                (None, None) => wait_fut.await.ok().and_then(|s| s.code()).unwrap_or(mux_protocol::exit_codes::SIGTERM),
            };

            if code == 255 {
                pool.report_failure(&target, "ssh exited 255 (transport failure)").await;
            } else {
                pool.mark_healthy(&target).await;
            }

            let _ = exit_tx.send(code);
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

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let quoted = posix_quote(&tilde_expand_ssh(&path.to_string_lossy()));
        self.run_remote_ok(&format!("cat {quoted}")).await
    }

    /// Resolves where a remote write should actually land and what mode (if
    /// any) it should carry, in one round trip: if `path` is a symlink, the
    /// write goes through to whatever it resolves to rather than replacing
    /// the link (spec.md §4.1 "symlinks resolved and written through"); if a
    /// file already exists at the resolved target, its mode is carried onto
    /// the new content (spec.md §4.1 "target permissions preserved where
    /// the file existed").
    async fn resolve_remote_write_target(&self, path: &Path) -> Result<(String, Option<String>)> {
        let quoted = posix_quote(&tilde_expand_ssh(&path.to_string_lossy()));
        let script = format!(
            "p={quoted}; if [ -L \"$p\" ]; then t=$(readlink -f \"$p\" 2>/dev/null || readlink \"$p\" 2>/dev/null || echo \"$p\"); else t=\"$p\"; fi; \
             if [ -e \"$t\" ]; then m=$(stat -c %a \"$t\" 2>/dev/null || stat -f %Lp \"$t\" 2>/dev/null); else m=; fi; \
             printf '%s\\n%s\\n' \"$t\" \"$m\""
        );
        let output = self.run_remote_ok(&script).await?;
        let text = String::from_utf8_lossy(&output);
        let mut lines = text.lines();
        let resolved = lines.next().map(str::trim).filter(|s| !s.is_empty());
        let mode = lines.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let resolved = resolved
            .map(str::to_string)
            .unwrap_or_else(|| tilde_expand_ssh(&path.to_string_lossy()));
        Ok((resolved, mode))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.ensure_connection().await?;
        let mkdir_quoted = posix_quote(&tilde_expand_ssh(
            &path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
        ));
        self.run_remote_ok(&format!("mkdir -p {mkdir_quoted}")).await?;

        let (remote_path, existing_mode) = self.resolve_remote_write_target(path).await?;
        let tmp_suffix = format!(
            ".tmp.{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        );
        let tmp_remote = format!("{remote_path}{tmp_suffix}");

        // `cat > tmp` over the same ssh multiplexed connection, writing the
        // payload to stdin, then a remote atomic rename.
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args());
        cmd.arg(&self.host);
        cmd.arg("--");
        cmd.arg(format!("cat > {}", posix_quote(&tmp_remote)));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| MuxError::exec(format!("ssh spawn: {e}")))?;
        {
            let stdin = child.stdin.as_mut().ok_or_else(|| MuxError::exec("missing stdin pipe"))?;
            stdin
                .write_all(contents)
                .await
                .map_err(|e| MuxError::network(format!("write over ssh: {e}")))?;
            stdin.shutdown().await.ok();
        }
        let status = child.wait().await.map_err(|e| MuxError::network(format!("ssh wait: {e}")))?;
        if !status.success() {
            return Err(MuxError::file_io(format!("remote write failed: {remote_path}")));
        }

        if let Some(mode) = &existing_mode {
            self.run_remote_ok(&format!("chmod {mode} {}", posix_quote(&tmp_remote))).await?;
        }

        let mv_cmd = format!(
            "mv {} {}",
            posix_quote(&tmp_remote),
            posix_quote(&remote_path)
        );
        self.run_remote_ok(&mv_cmd).await?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<Stat> {
        let quoted = posix_quote(&tilde_expand_ssh(&path.to_string_lossy()));
        let stdout = self
            .run_remote_ok(&format!("stat -c '%s %Y %F' {quoted} 2>/dev/null || stat -f '%z %m %HT' {quoted}"))
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        let mut parts = text.split_whitespace();
        let size: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let mtime: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let kind = parts.collect::<Vec<_>>().join(" ");
        Ok(Stat {
            size,
            modified_time: std::time::UNIX_EPOCH + Duration::from_secs(mtime),
            is_directory: kind.to_lowercase().contains("directory"),
        })
    }

    async fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let rewritten = tilde_expand_ssh(path);
        let stdout = self.run_remote_ok(&format!("eval echo {}", posix_quote(&rewritten))).await?;
        let resolved = String::from_utf8_lossy(&stdout).trim().to_string();
        Ok(PathBuf::from(resolved))
    }

    fn normalize_path(&self, target: &str, base: &Path) -> PathBuf {
        mux_protocol::normalize_path(target, base)
    }

    fn workspace_path(&self, project_path: &Path, workspace_name: &str) -> PathBuf {
        workspace_path(&self.config(), &project_path.to_string_lossy(), workspace_name)
    }

    async fn create_workspace(&self, opts: CreateWorkspaceOptions) -> Result<PathBuf> {
        Ok(self.workspace_path(&opts.project_path, &opts.workspace_name))
    }

    async fn init_workspace(&self, workspace_path: &Path, logger: &dyn InitLogger) -> Result<()> {
        let parent = workspace_path.parent().unwrap_or(workspace_path);
        self.post_create_setup(parent, logger).await?;
        logger.log(&format!("ssh workspace ready at {}", workspace_path.display()));
        Ok(())
    }

    async fn rename_workspace(&self, old_path: &Path, new_name: &str) -> Result<PathBuf> {
        let new_path = old_path
            .parent()
            .map(|p| p.join(new_name))
            .ok_or_else(|| MuxError::file_io("workspace path has no parent"))?;
        let cmd = format!(
            "mv {} {}",
            posix_quote(&tilde_expand_ssh(&old_path.to_string_lossy())),
            posix_quote(&tilde_expand_ssh(&new_path.to_string_lossy()))
        );
        self.run_remote_ok(&cmd).await?;
        Ok(new_path)
    }

    async fn delete_workspace(&self, workspace_path: &Path, opts: DeleteWorkspaceOptions) -> Result<()> {
        let quoted = posix_quote(&tilde_expand_ssh(&workspace_path.to_string_lossy()));
        let rm_flag = if opts.force { "-rf" } else { "-r" };
        let (code, _out, stderr) = self.run_remote(&format!("rm {rm_flag} {quoted}")).await?;
        let local_removal_succeeded = code == 0;
        if !local_removal_succeeded && !opts.force {
            return Err(MuxError::exec(format!(
                "remote delete failed: {}",
                String::from_utf8_lossy(&stderr)
            )));
        }

        if let Some(managed) = &self.managed_remote {
            // Never destroy a remote workspace another clone still shares
            // (spec.md §4.1 "never when existingWorkspace is true"), and
            // only when the local removal either succeeded or the caller
            // forced the delete through.
            if !managed.is_existing_workspace() && (local_removal_succeeded || opts.force) {
                managed.control_plane.delete_workspace(&managed.config.workspace_name).await?;
            }
        }
        Ok(())
    }

    async fn fork_workspace(&self, opts: ForkWorkspaceOptions) -> Result<PathBuf> {
        let source = self.src_base_dir.join(&opts.source_workspace_name);
        let fork_path = self.src_base_dir.join(&opts.new_workspace_name);
        let cmd = format!(
            "cd {} && git worktree add -b {} {}",
            posix_quote(&tilde_expand_ssh(&source.to_string_lossy())),
            posix_quote(&opts.new_workspace_name),
            posix_quote(&tilde_expand_ssh(&fork_path.to_string_lossy()))
        );
        self.run_remote_ok(&cmd).await?;

        // The fork is a git worktree inside the same managed remote as its
        // source (spec.md §4.1 "mark both source and fork as
        // existingWorkspace so neither can destroy the shared remote").
        // Both worktrees route delete/post-create through this one runtime,
        // so marking the shared flag here covers either workspace name.
        if let Some(managed) = &self.managed_remote {
            managed.mark_existing_workspace();
        }
        Ok(fork_path)
    }

    async fn ensure_ready(&self, timeout: Duration) -> Result<()> {
        if let Some(managed) = &self.managed_remote {
            let logger = crate::init_logger::NullInitLogger;
            managed
                .control_plane
                .start_and_wait(&managed.config.workspace_name, timeout, &logger)
                .await?;
        }
        tokio::time::timeout(timeout, self.ensure_connection())
            .await
            .map_err(|_| MuxError::network("ensure_ready timed out waiting for ssh connection"))??;
        Ok(())
    }

    fn temp_dir(&self) -> PathBuf {
        PathBuf::from("/tmp")
    }

    fn mux_home(&self) -> PathBuf {
        self.mux_home.clone()
    }
}
