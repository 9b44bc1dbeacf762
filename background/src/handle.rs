//! [`BackgroundHandle`]: the sole observability surface over an orphaned,
//! detached process group (spec.md §3/§4.3). The handle owns only
//! bookkeeping — the process itself is intentionally left running even if
//! every handle to it is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mux_protocol::Result;
use mux_runtime::Runtime;

/// How a background process currently stands, per spec.md §3: alive iff
/// `exit_code` doesn't exist yet. An unparseable `exit_code` file's raw
/// contents are preserved rather than discarded (spec.md §6: "return
/// unknown on unparseable content").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Running,
    Exited(i32),
    Unknown(String),
}

pub struct BackgroundHandle {
    runtime: Arc<dyn Runtime>,
    pub output_dir: PathBuf,
    pub pid: u32,
    pub pgid: u32,
}

const TERMINATE_GRACE: Duration = Duration::from_secs(2);

impl BackgroundHandle {
    pub fn new(runtime: Arc<dyn Runtime>, output_dir: PathBuf, pid: u32, pgid: u32) -> Self {
        Self { runtime, output_dir, pid, pgid }
    }

    fn exit_code_path(&self) -> PathBuf {
        self.output_dir.join("exit_code")
    }

    fn output_log_path(&self) -> PathBuf {
        self.output_dir.join("output.log")
    }

    fn meta_path(&self) -> PathBuf {
        self.output_dir.join("meta.json")
    }

    /// Reads `exit_code`. Its absence means the process is still alive —
    /// this is the sole liveness signal (spec.md §3/§8): once the file
    /// exists, its parsed value is stable for the rest of the handle's
    /// life, since nothing ever rewrites it except a defensive
    /// force-kill write from [`Self::terminate`].
    pub async fn get_exit_code(&self) -> Result<ExitState> {
        if self.runtime.stat(&self.exit_code_path()).await.is_err() {
            return Ok(ExitState::Running);
        }
        let bytes = self.runtime.read_file(&self.exit_code_path()).await?;
        let text = String::from_utf8_lossy(&bytes);
        let trimmed = text.trim();
        match trimmed.parse::<i32>() {
            Ok(code) => Ok(ExitState::Exited(code)),
            Err(_) => Ok(ExitState::Unknown(trimmed.to_string())),
        }
    }

    pub async fn is_alive(&self) -> Result<bool> {
        Ok(matches!(self.get_exit_code().await?, ExitState::Running))
    }

    /// Streams a slice of `output.log` from `offset` to the file's current
    /// end, returning the new offset the next call should resume from.
    /// Implemented through the owning runtime's `read_file`, so local and
    /// remote backends look identical to callers (spec.md §4.3).
    pub async fn read_output(&self, offset: u64) -> Result<(Vec<u8>, u64)> {
        let bytes = match self.runtime.read_file(&self.output_log_path()).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok((Vec::new(), offset)),
        };
        let offset = offset as usize;
        let slice = if offset < bytes.len() {
            bytes[offset..].to_vec()
        } else {
            Vec::new()
        };
        Ok((slice, bytes.len() as u64))
    }

    /// Atomic write of `meta.json` alongside the rest of the output
    /// directory, through the runtime's atomic `write_file`.
    pub async fn write_meta(&self, meta: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(meta)?;
        self.runtime.write_file(&self.meta_path(), &bytes).await
    }

    /// SIGTERM the process group, wait a grace period, SIGKILL if it's
    /// still alive. On a forced kill, defensively writes `137` to
    /// `exit_code` in case the process dies before its own trap can run
    /// (spec.md §4.3/§6).
    pub async fn terminate(&self) -> Result<()> {
        self.signal_group("-TERM").await?;
        tokio::time::sleep(TERMINATE_GRACE).await;

        if self.is_alive().await? {
            self.signal_group("-KILL").await?;
            let _ = self
                .runtime
                .write_file(&self.exit_code_path(), mux_protocol::exit_codes::SIGKILL.to_string().as_bytes())
                .await;
        }
        Ok(())
    }

    async fn signal_group(&self, signal: &str) -> Result<()> {
        let cmd = format!("kill {signal} -{}", self.pgid);
        let opts = mux_runtime::ExecOptions {
            cwd: self.output_dir.clone(),
            ..Default::default()
        };
        let mut stream = self.runtime.exec(&cmd, opts).await?;
        let _ = stream.exit_code.await;
        Ok(())
    }

    /// No-op on the OS process — the design is intentionally orphaning
    /// (spec.md §3 "Ownership").
    pub fn dispose(&self) {}
}

/// Windows/MSYS equivalent of [`BackgroundHandle::terminate`]'s signal step:
/// `kill -9 -PGID` via MSYS's `kill`.
pub fn windows_kill_command(pgid: u32) -> String {
    format!("kill -9 -{}", pgid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn windows_kill_command_targets_the_process_group() {
        assert_eq!(windows_kill_command(4242), "kill -9 -4242");
    }
}
