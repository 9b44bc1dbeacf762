//! Per-workspace stream coordinator (spec.md §4.4), the hard part of this
//! crate: drives an `AiService` streaming call over the workspace's
//! history, fans out every event to subscribers in order, queues messages
//! sent while a stream is live, and implements history compaction as an
//! atomic replace-all transition. Grounded on `codex-rs/core/src/codex.rs`'s
//! `Session` (idle/streaming state machine, fan-out to subscribers) and
//! `codex-rs/core/src/codex/compact.rs` (the clear-then-append shape).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use mux_protocol::{
    Message, MessageMetadata, MuxMetadata, MuxMetadataType, Part, Role, Result as MuxResult, SendMessageError,
};
use rand::Rng;
use tokio::sync::{broadcast, watch, Mutex};

use crate::ai_service::{AiService, AiStream, StreamEvent, StreamRequestOptions};
use crate::attachments::{EditTracker, PlanFileReader, PostCompactionAttachments};
use crate::compaction::{self, TRUNCATED_SENTINEL};
use crate::history::{HistoryError, HistoryLog, PendingMessage};
use crate::message_queue::{MessageQueue, SendOptions};

/// Idle/streaming state machine (spec.md §4.4 "State machine"). Resume and
/// interrupt are no-ops in the wrong state; history appends only happen
/// while idle (a user send) or at a compaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Streaming,
}

/// Every chat-visible event a session can emit, in the order spec.md §5
/// requires: `history → partial or replay → init-state → caught-up → live
/// events`, with no re-ordering for a subscriber that joins mid-stream.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    History(Vec<Message>),
    Partial(Message),
    InitState(Vec<String>),
    CaughtUp,
    MessageAppended(Message),
    Delete { history_sequences: Vec<u64> },
    StreamStart,
    StreamDelta { text: String },
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, partial_arguments: String },
    ToolCallEnd { id: String, name: String, output: serde_json::Value },
    ReasoningDelta { text: String },
    ReasoningEnd,
    RestoreToInput { text: String, images: Vec<Part> },
    StreamError { error: SendMessageError },
}

/// Identifies the user message that requested a compaction, paired with
/// its `muxMetadata`, so `drive_stream` can dedupe repeated completions of
/// the same request (spec.md §4.4 "dedupe via a session-local set").
type CompactionContext = Option<(String, MuxMetadata)>;

fn new_message_id(prefix: &str) -> String {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::rng().random();
    format!("{prefix}-{epoch}-{suffix:08x}")
}

/// Accumulates a streaming assistant turn's parts so a [`ChatEvent::Partial`]
/// replay or an abort-time truncation has something to show. Text is kept
/// as a single running buffer (rather than one `Part::Text` per delta) so a
/// subscriber replaying mid-stream sees one coherent block.
struct PartialBuilder {
    id: String,
    text: String,
    tool_args: HashMap<String, String>,
    finished_tools: Vec<(Part, Part)>,
}

impl PartialBuilder {
    fn new(id: String) -> Self {
        Self { id, text: String::new(), tool_args: HashMap::new(), finished_tools: Vec::new() }
    }

    fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    fn start_tool(&mut self, id: &str) {
        self.tool_args.entry(id.to_string()).or_default();
    }

    fn tool_delta(&mut self, id: &str, partial_arguments: &str) {
        self.tool_args.entry(id.to_string()).or_default().push_str(partial_arguments);
    }

    fn end_tool(&mut self, id: &str, name: &str, output: serde_json::Value) {
        let args_text = self.tool_args.remove(id).unwrap_or_default();
        let arguments = serde_json::from_str(&args_text).unwrap_or(serde_json::Value::String(args_text));
        self.finished_tools.push((
            Part::ToolCall { id: id.to_string(), name: name.to_string(), arguments },
            Part::ToolResult { id: id.to_string(), output },
        ));
    }

    fn text_so_far(&self) -> String {
        self.text.clone()
    }

    /// Renders the in-progress turn as a `Message` for replay purposes.
    /// `history_sequence` is meaningless here (the message isn't committed
    /// yet) and is always `0`.
    fn as_message(&self) -> Message {
        let mut parts = Vec::new();
        for (call, result) in &self.finished_tools {
            parts.push(call.clone());
            parts.push(result.clone());
        }
        if !self.text.is_empty() {
            parts.push(Part::Text { text: self.text.clone() });
        }
        Message {
            id: self.id.clone(),
            role: Role::Assistant,
            parts,
            metadata: MessageMetadata::default(),
            history_sequence: 0,
        }
    }
}

/// Per-workspace stream coordinator. Created lazily, one per workspace id,
/// by the owning manager (`mux-core`'s `WorkspaceService`); referenced via
/// `Arc` so background tasks it spawns (queue drains, auto-follow-ups) can
/// outlive the call that triggered them.
pub struct AgentSession {
    history: HistoryLog,
    ai: Arc<dyn AiService>,
    state: Mutex<State>,
    partial: Mutex<Option<Message>>,
    queue: Mutex<MessageQueue>,
    chat_tx: broadcast::Sender<ChatEvent>,
    processed_compaction_ids: Mutex<HashSet<String>>,
    init_lines: Mutex<Vec<String>>,
    current_abort: Mutex<Option<watch::Sender<bool>>>,
    pending_abandon_partial: Mutex<Option<bool>>,
    edits: Mutex<EditTracker>,
    plan_reader: Option<Arc<dyn PlanFileReader>>,
}

const CHAT_EVENT_CAPACITY: usize = 256;

impl AgentSession {
    /// `history_path` is this workspace's append-only log file (spec.md
    /// §6/§9), typically `<mux_home>/workspaces/<id>/history.jsonl`.
    pub fn new(ai: Arc<dyn AiService>, history_path: PathBuf) -> Arc<Self> {
        Self::with_plan_reader(ai, history_path, None)
    }

    pub fn with_plan_reader(
        ai: Arc<dyn AiService>,
        history_path: PathBuf,
        plan_reader: Option<Arc<dyn PlanFileReader>>,
    ) -> Arc<Self> {
        let (chat_tx, _rx) = broadcast::channel(CHAT_EVENT_CAPACITY);
        Arc::new(Self {
            history: HistoryLog::new(history_path),
            ai,
            state: Mutex::new(State::Idle),
            partial: Mutex::new(None),
            queue: Mutex::new(MessageQueue::new()),
            chat_tx,
            processed_compaction_ids: Mutex::new(HashSet::new()),
            init_lines: Mutex::new(Vec::new()),
            current_abort: Mutex::new(None),
            pending_abandon_partial: Mutex::new(None),
            edits: Mutex::new(EditTracker::new()),
            plan_reader,
        })
    }

    /// Records an init-log line; replayed to every subscriber that joins
    /// after it (spec.md §4.4's `InitStateManager` listener).
    pub async fn push_init_line(&self, line: impl Into<String>) {
        self.init_lines.lock().await.push(line.into());
    }

    /// Lets surrounding services (the RPC layer) emit an event through this
    /// session's fan-out without going through a send/stream call.
    pub fn emit_chat_event(&self, event: ChatEvent) {
        let _ = self.chat_tx.send(event);
    }

    /// Replays full history, any live partial, the init-state log, then a
    /// one-shot `caught-up` marker, then forwards live events — in that
    /// order, with no re-ordering (spec.md §4.4/§5). Subscribes to the
    /// broadcast channel *before* reading the replay snapshots so no event
    /// emitted concurrently with the replay is missed.
    pub async fn subscribe_chat(self: &Arc<Self>) -> tokio::sync::mpsc::Receiver<ChatEvent> {
        let mut live = self.chat_tx.subscribe();
        let (tx, rx) = tokio::sync::mpsc::channel(CHAT_EVENT_CAPACITY);

        let history = self.history.snapshot().await;
        let partial = self.partial.lock().await.clone();
        let init_lines = self.init_lines.lock().await.clone();

        tokio::spawn(async move {
            if tx.send(ChatEvent::History(history)).await.is_err() {
                return;
            }
            if let Some(partial) = partial {
                if tx.send(ChatEvent::Partial(partial)).await.is_err() {
                    return;
                }
            }
            if tx.send(ChatEvent::InitState(init_lines)).await.is_err() {
                return;
            }
            if tx.send(ChatEvent::CaughtUp).await.is_err() {
                return;
            }
            loop {
                match live.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        rx
    }

    async fn set_state(&self, state: State) {
        *self.state.lock().await = state;
    }

    async fn set_partial(&self, partial: Option<Message>) {
        *self.partial.lock().await = partial;
    }

    pub async fn queue_message(
        &self,
        text: String,
        images: Vec<Part>,
        mux_metadata: Option<MuxMetadata>,
        options: SendOptions,
    ) -> Result<(), SendMessageError> {
        self.queue.lock().await.add(text, images, mux_metadata, options)
    }

    pub async fn clear_queue(&self) {
        self.queue.lock().await.clear();
    }

    /// Send semantics (spec.md §4.4 "Send semantics"): requires non-empty
    /// text or at least one image; an `edit_message_id` truncates history
    /// after that id first (a "not found" is tolerated — idempotent edit
    /// recovery after compaction); appends the user message, emits it, then
    /// drives a fresh stream over the updated history.
    pub async fn send_message(
        self: &Arc<Self>,
        text: String,
        images: Vec<Part>,
        mux_metadata: Option<MuxMetadata>,
        options: StreamRequestOptions,
        edit_message_id: Option<String>,
    ) -> Result<(), SendMessageError> {
        self.send_message_excluding(text, images, mux_metadata, options, edit_message_id, HashSet::new()).await
    }

    /// Same as [`Self::send_message`], with a caller-provided set of paths
    /// excluded from any post-compaction attachment snapshot this send
    /// would otherwise attach (spec.md §4.4 "Post-compaction attachments").
    pub async fn send_message_excluding(
        self: &Arc<Self>,
        text: String,
        mut images: Vec<Part>,
        mux_metadata: Option<MuxMetadata>,
        options: StreamRequestOptions,
        edit_message_id: Option<String>,
        excluded_attachments: HashSet<String>,
    ) -> Result<(), SendMessageError> {
        if text.is_empty() && images.is_empty() {
            return Err(SendMessageError::EmptyMessage);
        }

        if let Some(id) = &edit_message_id {
            match self.history.truncate_after(id).await {
                Ok(deleted) if !deleted.is_empty() => {
                    self.emit_chat_event(ChatEvent::Delete { history_sequences: deleted });
                }
                Ok(_) => {}
                Err(HistoryError::NotFound(_)) => {}
            }
        }

        let mut edits = self.edits.lock().await;
        if !edits.is_empty() {
            let plan = match &self.plan_reader {
                Some(reader) => reader.read_plan().await,
                None => None,
            };
            let snapshot = edits.snapshot(plan, &excluded_attachments);
            attach_snapshot(&mut images, &snapshot);
            edits.clear();
        }
        drop(edits);

        let mut parts = vec![Part::Text { text: text.clone() }];
        parts.extend(images);
        let pending = PendingMessage {
            id: new_message_id("user"),
            role: Role::User,
            parts,
            metadata: MessageMetadata { mux_metadata: mux_metadata.clone(), ..Default::default() },
        };
        let appended = self.history.append(pending).await;
        self.emit_chat_event(ChatEvent::MessageAppended(appended.clone()));

        // Commit any in-progress partial before starting a new stream — a
        // second send while one is already live finalizes the prior turn's
        // accumulated text rather than discarding it.
        self.commit_partial().await;

        self.set_state(State::Streaming).await;
        let history_snapshot = self.history.snapshot().await;
        let stream = match self.ai.stream(history_snapshot, options).await {
            Ok(stream) => stream,
            Err(_) => {
                self.set_state(State::Idle).await;
                self.emit_chat_event(ChatEvent::StreamError { error: SendMessageError::Unknown });
                return Err(SendMessageError::Unknown);
            }
        };

        let compaction_ctx: CompactionContext = mux_metadata.map(|m| (appended.id.clone(), m));
        self.drive_stream(stream, compaction_ctx).await;
        Ok(())
    }

    /// If a partial was left over from an interrupted or superseded turn,
    /// append it to history as-is so it isn't silently lost.
    async fn commit_partial(&self) {
        let partial = self.partial.lock().await.take();
        if let Some(partial) = partial {
            if !partial.parts.is_empty() {
                let pending = PendingMessage {
                    id: partial.id,
                    role: partial.role,
                    parts: partial.parts,
                    metadata: partial.metadata,
                };
                let appended = self.history.append(pending).await;
                self.emit_chat_event(ChatEvent::MessageAppended(appended));
            }
        }
    }

    /// If not currently streaming, re-streams using the current history
    /// (spec.md §4.4 "resumeStream"). No-op while already streaming.
    pub async fn resume_stream(self: &Arc<Self>, options: StreamRequestOptions) -> MuxResult<()> {
        if *self.state.lock().await != State::Idle {
            return Ok(());
        }
        self.set_state(State::Streaming).await;
        let history_snapshot = self.history.snapshot().await;
        let stream = self.ai.stream(history_snapshot, options).await?;
        self.drive_stream(stream, None).await;
        Ok(())
    }

    /// Best-effort interrupt: returns success even if the stream had
    /// already settled (spec.md §5 "Cancellation"). No-op while idle.
    pub async fn interrupt_stream(&self, abandon_partial: bool) {
        if *self.state.lock().await != State::Streaming {
            return;
        }
        *self.pending_abandon_partial.lock().await = Some(abandon_partial);
        if let Some(abort) = self.current_abort.lock().await.as_ref() {
            let _ = abort.send(true);
        }
    }

    async fn should_compact(&self, ctx: &CompactionContext) -> bool {
        let Some((request_id, mux_metadata)) = ctx else { return false };
        if mux_metadata.kind != MuxMetadataType::CompactionRequest {
            return false;
        }
        let mut processed = self.processed_compaction_ids.lock().await;
        if processed.contains(request_id) {
            false
        } else {
            processed.insert(request_id.clone());
            true
        }
    }

    /// Drains the queue if the session is idle, spawning the follow-up send
    /// as its own task so the caller (inside an event-handling loop) never
    /// blocks on it. Called on `tool-call-end` and `stream-end` (spec.md
    /// §4.4 "Queued-send triggers"); the `tool-call-end` call is a no-op in
    /// this implementation's single-continuous-stream model, since the
    /// session is still `Streaming` at that point — it only has an effect
    /// once `stream-end` has flipped the state back to `Idle`.
    fn try_drain_queue(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            if *this.state.lock().await != State::Idle {
                return;
            }
            let produced = {
                let mut queue = this.queue.lock().await;
                if queue.is_empty() {
                    return;
                }
                let produced = queue.produce_message();
                queue.clear();
                produced
            };
            let options = StreamRequestOptions {
                model: produced.options.model,
                tool_policy: produced.options.tool_policy,
                thinking_policy: None,
            };
            let _ = this.send_message(produced.text, produced.images, produced.mux_metadata, options, None).await;
        });
    }

    /// Restores the queue's accumulated text/images to the caller as a
    /// `restore-to-input` event and clears it (spec.md §4.4 "Queued-send
    /// triggers" — the `stream-abort` branch).
    async fn restore_queue_to_input(&self) {
        let produced = {
            let mut queue = self.queue.lock().await;
            let produced = queue.produce_message();
            queue.clear();
            produced
        };
        if !produced.text.is_empty() || !produced.images.is_empty() {
            self.emit_chat_event(ChatEvent::RestoreToInput { text: produced.text, images: produced.images });
        }
    }

    /// Runs the atomic compaction procedure from spec.md §4.4: aggregate
    /// historical usage, clear the log, append one summary message, emit
    /// exactly one delete event followed by the summary. Appending after a
    /// successful clear is unconditional here (`HistoryLog::append` cannot
    /// itself fail); per spec.md §7 this crate does not attempt to undo a
    /// clear if a downstream step were to fail.
    async fn run_compaction(&self, summary_text: &str, source_metadata: &MessageMetadata) {
        let history = self.history.snapshot().await;
        let historical_usage = compaction::aggregate_historical_usage(&history);
        let deleted = self.history.clear_all().await;
        let metadata = compaction::summary_metadata(
            source_metadata.model.clone(),
            source_metadata.usage.clone(),
            historical_usage,
            source_metadata.provider_metadata.clone(),
            source_metadata.duration_ms,
            source_metadata.system_message_tokens,
        );
        let pending = PendingMessage {
            id: new_message_id("asst"),
            role: Role::Assistant,
            parts: vec![Part::Text { text: summary_text.to_string() }],
            metadata,
        };
        let summary = self.history.append(pending).await;
        self.emit_chat_event(ChatEvent::Delete { history_sequences: deleted });
        self.emit_chat_event(ChatEvent::MessageAppended(summary));
        self.edits.lock().await.clear();
    }

    async fn drive_stream(self: &Arc<Self>, mut stream: AiStream, compaction_ctx: CompactionContext) {
        *self.current_abort.lock().await = Some(stream.abort.clone());
        let mut builder = PartialBuilder::new(new_message_id("asst"));
        self.set_partial(Some(builder.as_message())).await;

        while let Some(event) = stream.events.recv().await {
            match event {
                StreamEvent::StreamStart => self.emit_chat_event(ChatEvent::StreamStart),
                StreamEvent::StreamDelta { text } => {
                    builder.push_text(&text);
                    self.set_partial(Some(builder.as_message())).await;
                    self.emit_chat_event(ChatEvent::StreamDelta { text });
                }
                StreamEvent::ToolCallStart { id, name } => {
                    builder.start_tool(&id);
                    self.emit_chat_event(ChatEvent::ToolCallStart { id, name });
                }
                StreamEvent::ToolCallDelta { id, partial_arguments } => {
                    builder.tool_delta(&id, &partial_arguments);
                    self.emit_chat_event(ChatEvent::ToolCallDelta { id, partial_arguments });
                }
                StreamEvent::ToolCallEnd { id, name, output } => {
                    builder.end_tool(&id, &name, output.clone());
                    self.set_partial(Some(builder.as_message())).await;
                    self.edits.lock().await.record(&name, &output);
                    self.emit_chat_event(ChatEvent::ToolCallEnd { id, name, output });
                    self.try_drain_queue();
                }
                StreamEvent::ReasoningDelta { text } => self.emit_chat_event(ChatEvent::ReasoningDelta { text }),
                StreamEvent::ReasoningEnd => self.emit_chat_event(ChatEvent::ReasoningEnd),
                StreamEvent::StreamEnd { message } => {
                    self.set_partial(None).await;
                    *self.current_abort.lock().await = None;
                    self.set_state(State::Idle).await;

                    // A completion that answers a recognized compaction
                    // request never joins history as an ordinary assistant
                    // turn: its text becomes the summary directly, via
                    // `run_compaction`, rather than being appended and then
                    // immediately cleared again.
                    if self.should_compact(&compaction_ctx).await {
                        let summary_text = message.text();
                        self.run_compaction(&summary_text, &message.metadata).await;
                        if let Some(continue_message) =
                            compaction_ctx.as_ref().and_then(|(_, m)| m.continue_message.clone())
                        {
                            let this = self.clone();
                            tokio::spawn(async move {
                                let _ = this
                                    .send_message(continue_message, vec![], None, StreamRequestOptions::default(), None)
                                    .await;
                            });
                            return;
                        }
                        self.try_drain_queue();
                        return;
                    }

                    let pending = PendingMessage {
                        id: message.id,
                        role: message.role,
                        parts: message.parts,
                        metadata: message.metadata,
                    };
                    let appended = self.history.append(pending).await;
                    self.emit_chat_event(ChatEvent::MessageAppended(appended));
                    self.try_drain_queue();
                    return;
                }
                StreamEvent::StreamAbort { abandon_partial } => {
                    *self.current_abort.lock().await = None;
                    let requested = self.pending_abandon_partial.lock().await.take();
                    let abandon_partial = requested.unwrap_or(abandon_partial);
                    self.set_state(State::Idle).await;

                    // Open Question (a): abandon_partial=true never compacts.
                    if !abandon_partial && self.should_compact(&compaction_ctx).await {
                        let mut text = builder.text_so_far();
                        text.push_str(TRUNCATED_SENTINEL);
                        self.run_compaction(&text, &MessageMetadata::default()).await;
                        self.set_partial(None).await;
                        return;
                    }

                    if abandon_partial {
                        self.set_partial(None).await;
                    } else {
                        // Leave the partial in place for replay; the next
                        // send will commit it via `commit_partial`.
                    }
                    self.restore_queue_to_input().await;
                    return;
                }
                StreamEvent::Error { message } => {
                    *self.current_abort.lock().await = None;
                    self.set_state(State::Idle).await;
                    tracing::error!(error = %message, "ai stream error");
                    self.emit_chat_event(ChatEvent::StreamError { error: SendMessageError::Unknown });
                    return;
                }
            }
        }
    }
}

/// Attaches a post-compaction snapshot to the outgoing message's image/file
/// parts: the plan file (if any) and one entry per surviving edited file.
fn attach_snapshot(images: &mut Vec<Part>, snapshot: &PostCompactionAttachments) {
    if snapshot.is_empty() {
        return;
    }
    if let Some(plan) = &snapshot.plan {
        images.push(Part::File { path: format!("plan:{plan}"), mime_type: Some("text/plain".to_string()) });
    }
    for edit in &snapshot.edited_files {
        images.push(Part::File {
            path: edit.path.clone(),
            mime_type: Some(if edit.truncated { "text/x-diff-truncated".to_string() } else { "text/x-diff".to_string() }),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct ScriptedAi {
        // Each call to `stream` pops the next scripted batch of events.
        batches: Mutex<Vec<Vec<StreamEvent>>>,
    }

    #[async_trait]
    impl AiService for ScriptedAi {
        async fn stream(&self, _history: Vec<Message>, _options: StreamRequestOptions) -> MuxResult<AiStream> {
            let batch = self.batches.lock().await.remove(0);
            let (tx, rx) = mpsc::channel(32);
            let (abort_tx, _abort_rx) = watch::channel(false);
            tokio::spawn(async move {
                for event in batch {
                    let _ = tx.send(event).await;
                }
            });
            Ok(AiStream { events: rx, abort: abort_tx })
        }
    }

    fn assistant_end(text: &str, usage: Option<mux_protocol::Usage>) -> StreamEvent {
        StreamEvent::StreamEnd {
            message: Message {
                id: new_message_id("asst"),
                role: Role::Assistant,
                parts: vec![Part::Text { text: text.to_string() }],
                metadata: MessageMetadata { usage, ..Default::default() },
                history_sequence: 0,
            },
        }
    }

    async fn drain_n(rx: &mut tokio::sync::mpsc::Receiver<ChatEvent>, n: usize) -> Vec<ChatEvent> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(rx.recv().await.expect("expected an event"));
        }
        out
    }

    #[tokio::test]
    async fn subscribe_replay_order_is_history_partial_initstate_caughtup() {
        let ai = Arc::new(ScriptedAi { batches: Mutex::new(vec![]) });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));
        session.push_init_line("booted").await;

        let mut rx = session.subscribe_chat().await;
        let events = drain_n(&mut rx, 3).await;
        assert!(matches!(events[0], ChatEvent::History(ref h) if h.is_empty()));
        assert!(matches!(events[1], ChatEvent::InitState(ref lines) if lines == &vec!["booted".to_string()]));
        assert!(matches!(events[2], ChatEvent::CaughtUp));
    }

    #[tokio::test]
    async fn send_message_rejects_empty_text_and_images() {
        let ai = Arc::new(ScriptedAi { batches: Mutex::new(vec![]) });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));
        let err = session
            .send_message(String::new(), vec![], None, StreamRequestOptions::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err, SendMessageError::EmptyMessage);
    }

    #[tokio::test]
    async fn scenario_3_compaction_on_stream_end_emits_delete_then_summary() {
        let ai = Arc::new(ScriptedAi {
            batches: Mutex::new(vec![
                vec![assistant_end("a1", Some(mux_protocol::Usage { input_tokens: 10, output_tokens: 90, total_tokens: 100 }))],
                vec![assistant_end("a2", Some(mux_protocol::Usage { input_tokens: 20, output_tokens: 180, total_tokens: 200 }))],
                vec![StreamEvent::StreamStart, StreamEvent::StreamDelta { text: "SUMMARY".to_string() }, assistant_end("SUMMARY", None)],
            ]),
        });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));

        session.send_message("u1".to_string(), vec![], None, StreamRequestOptions::default(), None).await.unwrap();
        session.send_message("u2".to_string(), vec![], None, StreamRequestOptions::default(), None).await.unwrap();

        let mut rx = session.subscribe_chat().await;
        let replay = drain_n(&mut rx, 4).await;
        let ChatEvent::History(history) = &replay[0] else { panic!("expected history") };
        assert_eq!(history.len(), 4);

        let compaction_meta = MuxMetadata { kind: MuxMetadataType::CompactionRequest, continue_message: None, raw_command: None };
        session
            .send_message("/compact".to_string(), vec![], Some(compaction_meta), StreamRequestOptions::default(), None)
            .await
            .unwrap();

        // Drain the live forward of our own "/compact" user-message append,
        // then stream-start/delta, then the compaction's delete+summary.
        let mut seen_delete = false;
        let mut summary_text = None;
        for _ in 0..10 {
            match rx.recv().await.expect("event") {
                ChatEvent::Delete { history_sequences } => {
                    seen_delete = true;
                    // 4 prior messages + the /compact request itself = 5 deleted.
                    assert_eq!(history_sequences.len(), 5);
                }
                ChatEvent::MessageAppended(msg) if msg.metadata.compacted => {
                    summary_text = Some(msg.text());
                    break;
                }
                _ => {}
            }
        }
        assert!(seen_delete, "expected exactly one delete event");
        assert_eq!(summary_text.as_deref(), Some("SUMMARY"));

        let final_history = session.history.snapshot().await;
        assert_eq!(final_history.len(), 1);
        assert!(final_history[0].metadata.compacted);
        assert_eq!(final_history[0].metadata.historical_usage.as_ref().unwrap().total_tokens, 300);
    }

    #[tokio::test]
    async fn scenario_4_abort_during_compaction_appends_truncated_sentinel() {
        let ai = Arc::new(ScriptedAi {
            batches: Mutex::new(vec![vec![
                StreamEvent::StreamStart,
                StreamEvent::StreamDelta { text: "PART".to_string() },
                StreamEvent::StreamAbort { abandon_partial: false },
            ]]),
        });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));

        let compaction_meta = MuxMetadata { kind: MuxMetadataType::CompactionRequest, continue_message: None, raw_command: None };
        session
            .send_message("/compact".to_string(), vec![], Some(compaction_meta), StreamRequestOptions::default(), None)
            .await
            .unwrap();

        let history = session.history.snapshot().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].metadata.compacted);
        assert_eq!(history[0].text(), "PART\n\n[truncated]");
    }

    #[tokio::test]
    async fn abandon_partial_true_never_compacts() {
        let ai = Arc::new(ScriptedAi {
            batches: Mutex::new(vec![vec![
                StreamEvent::StreamDelta { text: "PART".to_string() },
                StreamEvent::StreamAbort { abandon_partial: true },
            ]]),
        });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));
        let compaction_meta = MuxMetadata { kind: MuxMetadataType::CompactionRequest, continue_message: None, raw_command: None };
        session
            .send_message("/compact".to_string(), vec![], Some(compaction_meta), StreamRequestOptions::default(), None)
            .await
            .unwrap();

        let history = session.history.snapshot().await;
        // Only the user's "/compact" request is in history; no summary was
        // produced because abandon_partial=true suppresses compaction.
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn stream_abort_restores_queue_to_input() {
        let ai = Arc::new(ScriptedAi {
            batches: Mutex::new(vec![vec![StreamEvent::StreamAbort { abandon_partial: true }]]),
        });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));
        session.queue_message("queued text".to_string(), vec![], None, SendOptions::default()).await.unwrap();

        let mut rx = session.subscribe_chat().await;
        let _ = drain_n(&mut rx, 3).await; // history, init-state, caught-up (no partial yet)

        session.send_message("go".to_string(), vec![], None, StreamRequestOptions::default(), None).await.unwrap();

        let mut restored = None;
        for _ in 0..5 {
            if let ChatEvent::RestoreToInput { text, .. } = rx.recv().await.expect("event") {
                restored = Some(text);
                break;
            }
        }
        assert_eq!(restored.as_deref(), Some("queued text"));
        assert!(session.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn interrupt_stream_is_a_noop_while_idle() {
        let ai = Arc::new(ScriptedAi { batches: Mutex::new(vec![]) });
        let session = AgentSession::new(ai, tempfile::tempdir().unwrap().into_path().join("history.jsonl"));
        session.interrupt_stream(false).await; // should not panic or hang
    }
}
