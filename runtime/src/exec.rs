//! Exec contract shared by every runtime variant (spec.md §4.1).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

/// Options accepted by [`crate::Runtime::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub abort: Option<watch::Receiver<bool>>,
    pub force_pty: bool,
    pub niceness: Option<i32>,
}

/// A running (or just-finished) exec call. `stdout`/`stderr` are readable
/// streams, `stdin` a writable one; all three terminate when the process
/// exits. `exit_code` resolves once the process has actually settled —
/// to [`mux_protocol::exit_codes::ABORTED`] or
/// [`mux_protocol::exit_codes::TIMEOUT`] if the call never got a real exit
/// status, otherwise the child's own code.
pub struct ExecStream {
    pub stdout: Box<dyn AsyncRead + Unpin + Send>,
    pub stderr: Box<dyn AsyncRead + Unpin + Send>,
    pub stdin: Box<dyn AsyncWrite + Unpin + Send>,
    pub exit_code: tokio::sync::oneshot::Receiver<i32>,
    pub duration: tokio::sync::oneshot::Receiver<Duration>,
}

/// Filesystem metadata returned by [`crate::Runtime::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub modified_time: std::time::SystemTime,
    pub is_directory: bool,
}
