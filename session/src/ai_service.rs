//! The one deliberately unimplemented external collaborator named in
//! spec.md §1 ("the AI provider SDKs" are out of scope). `AgentSession`
//! only ever talks to the AI layer through this narrow trait; production
//! wiring lives outside this crate, and tests supply a fake.

use async_trait::async_trait;
use mux_protocol::{Message, Result};
use tokio::sync::{mpsc, watch};

/// Knobs threaded through to a single streaming call.
#[derive(Debug, Clone, Default)]
pub struct StreamRequestOptions {
    pub model: Option<String>,
    pub tool_policy: Option<String>,
    pub thinking_policy: Option<String>,
}

/// Events fanned out while a stream is live (spec.md §4.4): `stream-start`,
/// `stream-delta`, `tool-call-start|delta|end`, `reasoning-delta|end`,
/// `stream-end`, `stream-abort`, `error`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart,
    StreamDelta { text: String },
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, partial_arguments: String },
    ToolCallEnd { id: String, name: String, output: serde_json::Value },
    ReasoningDelta { text: String },
    ReasoningEnd,
    /// The stream settled normally; `message` is the complete assistant
    /// message (parts, metadata, usage) ready to append to history.
    StreamEnd { message: Message },
    /// The stream was interrupted. `abandon_partial = true` means the
    /// caller explicitly asked to discard whatever had accumulated, rather
    /// than treat it as a truncated-but-usable turn.
    StreamAbort { abandon_partial: bool },
    Error { message: String },
}

/// A live stream: the event channel the session drains, and a signal the
/// session can flip to request early termination (mirrors the
/// `watch`-based abort signal used by `mux-runtime::exec`).
pub struct AiStream {
    pub events: mpsc::Receiver<StreamEvent>,
    pub abort: watch::Sender<bool>,
}

#[async_trait]
pub trait AiService: Send + Sync {
    /// Starts a streaming call over `history` with the given options,
    /// returning a handle to its event stream. Implementations own
    /// reconnect/retry policy internally — from this crate's point of view
    /// a stream either starts or fails outright.
    async fn stream(&self, history: Vec<Message>, options: StreamRequestOptions) -> Result<AiStream>;
}
