use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MuxError>;

/// Error taxonomy shared by every crate in this workspace. Individual crates
/// define their own narrower errors where useful and convert into this one
/// at the boundary the caller actually sees (matching codex-core's
/// `CodexErr` pattern: one big enum, `#[from]` conversions for the common
/// external error types, and a handful of hand-written variants for
/// programmer-facing conditions).
#[derive(Error, Debug)]
pub enum MuxError {
    /// Failure spawning or observing a process.
    #[error("exec failed: {0}")]
    Exec(String),

    /// Read/write/stat/rename problem.
    #[error("file i/o failed: {0}")]
    FileIo(String),

    /// SSH transport or remote-fetch error.
    #[error("network error: {0}")]
    Network(String),

    /// A persisted config references a runtime variant this build doesn't
    /// know about.
    #[error("workspace config uses an unsupported runtime; upgrade mux")]
    IncompatibleRuntime,

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("failed to start runtime: {0}")]
    RuntimeStartFailed(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    SendMessage(#[from] SendMessageError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MuxError {
    pub fn exec(msg: impl Into<String>) -> Self {
        Self::Exec(msg.into())
    }

    pub fn file_io(msg: impl Into<String>) -> Self {
        Self::FileIo(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }
}

/// Narrow error enum for `AgentSession::send_message`, surfaced to
/// subscribers as a `stream-error` chat event per spec.md §4.4/§7.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendMessageError {
    #[error("unknown error sending message")]
    Unknown,

    #[error("cannot resume: not currently streaming")]
    NotStreaming,

    #[error("message has no text and no images")]
    EmptyMessage,

    #[error("message queue rejected addition: {0}")]
    QueueRejected(String),

    #[error("no message with id {0} found in history")]
    EditTargetNotFound(String),
}
