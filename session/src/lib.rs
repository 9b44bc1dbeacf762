//! Per-workspace agent session (spec.md §4.4/§4.5): an append-only history
//! log, a pending-send queue, and the stream coordinator that drives an
//! `AiService` call over them and fans out chat events to subscribers.
//! Grounded on `codex-rs/core/src/codex.rs`'s `Session` actor and
//! `codex-rs/core/src/codex/compact.rs`'s compaction shape.

pub mod agent_session;
pub mod ai_service;
pub mod attachments;
pub mod compaction;
pub mod history;
pub mod message_queue;

pub use agent_session::{AgentSession, ChatEvent};
pub use ai_service::{AiService, AiStream, StreamEvent, StreamRequestOptions};
pub use attachments::{EditTracker, EditedFileRef, PlanFileReader, PostCompactionAttachments};
pub use compaction::{aggregate_historical_usage, is_compaction_request, summary_metadata, TRUNCATED_SENTINEL};
pub use history::{HistoryError, HistoryLog, PendingMessage};
pub use message_queue::{MessageQueue, ProducedMessage, SendOptions};
