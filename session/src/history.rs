//! Append-only per-workspace history log (spec.md §3/§4.4/§6/§9). An actor
//! task owns the in-memory `Vec<Message>`, the sequence counter, and the
//! on-disk file: callers talk to it through a channel, mirroring the
//! single-writer-task-over-mpsc shape of the teacher's rollout recorder
//! (`codex-rs/core/src/rollout/recorder.rs`). Writes are serialized by
//! construction (one task, one mailbox); reads never block a writer.
//!
//! Each message is framed as one newline-delimited JSON line
//! (`serde_json`), appended with `OpenOptions::append(true).create(true)`
//! the same way the teacher's recorder appends rollout items. A clear or
//! truncate doesn't shrink the file in place; it rewrites the whole log
//! through `mux_runtime::atomic_write::atomic_write_local` (write to temp,
//! rename over target), the same write-to-temp-then-rename path
//! `workspace_store::save` uses for metadata (spec.md §9 "the file lock is
//! per-workspace").

use std::path::{Path, PathBuf};

use mux_protocol::{Message, MessageMetadata, Part, Role};
use mux_runtime::atomic_write::atomic_write_local;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// A message on its way into the log — everything but the
/// actor-assigned `history_sequence`.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub metadata: MessageMetadata,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Returned by `truncate_after` when `id` isn't in the log. Callers
    /// performing an edit-message recovery after a compaction treat this as
    /// benign rather than fatal (spec.md §4.4/§6).
    #[error("no message with id {0} found in history")]
    NotFound(String),
}

enum HistoryCmd {
    Append {
        message: PendingMessage,
        reply: oneshot::Sender<Message>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
    TruncateAfter {
        id: String,
        reply: oneshot::Sender<Result<Vec<u64>, HistoryError>>,
    },
    ClearAll {
        reply: oneshot::Sender<Vec<u64>>,
    },
}

/// Handle to a running history-log actor. Cheap to clone; every clone
/// shares the same underlying task and therefore the same serialization of
/// writes and the same file.
#[derive(Clone)]
pub struct HistoryLog {
    tx: mpsc::Sender<HistoryCmd>,
}

struct Actor {
    path: PathBuf,
    messages: Vec<Message>,
    next_sequence: u64,
}

impl Actor {
    /// Loads whatever is already on disk at `path`, reconstructing
    /// `next_sequence` from the highest `history_sequence` seen so a
    /// restart doesn't reuse or gap sequence numbers. A line that fails to
    /// parse is skipped with a warning rather than failing the whole load —
    /// one corrupt line shouldn't hide the rest of the conversation.
    async fn load(path: PathBuf) -> Self {
        let mut messages = Vec::new();
        let mut next_sequence = 0u64;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                for line in text.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Message>(line) {
                        Ok(message) => {
                            next_sequence = next_sequence.max(message.history_sequence + 1);
                            messages.push(message);
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping unparseable history line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read history log, starting empty");
            }
        }
        Self { path, messages, next_sequence }
    }

    fn append(&mut self, pending: PendingMessage) -> Message {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let message = Message {
            id: pending.id,
            role: pending.role,
            parts: pending.parts,
            metadata: pending.metadata,
            history_sequence: sequence,
        };
        self.messages.push(message.clone());
        message
    }

    fn truncate_after(&mut self, id: &str) -> Result<Vec<u64>, HistoryError> {
        let Some(pos) = self.messages.iter().position(|m| m.id == id) else {
            return Err(HistoryError::NotFound(id.to_string()));
        };
        let removed: Vec<u64> = self.messages[pos + 1..].iter().map(|m| m.history_sequence).collect();
        self.messages.truncate(pos + 1);
        Ok(removed)
    }

    fn clear_all(&mut self) -> Vec<u64> {
        let removed: Vec<u64> = self.messages.iter().map(|m| m.history_sequence).collect();
        self.messages.clear();
        removed
    }

    /// Appends one framed NDJSON line for `message` to the log file,
    /// creating the parent directory and the file on first write.
    async fn append_to_disk(&self, message: &Message) {
        if let Err(e) = append_line(&self.path, message).await {
            tracing::error!(path = %self.path.display(), error = %e, "failed to persist history append");
        }
    }

    /// Rewrites the whole log atomically from the in-memory snapshot,
    /// used after a clear or truncate so the file never holds a line the
    /// in-memory log has dropped (spec.md §9).
    async fn persist_snapshot(&self) {
        if let Err(e) = rewrite_snapshot(&self.path, &self.messages).await {
            tracing::error!(path = %self.path.display(), error = %e, "failed to persist history snapshot");
        }
    }
}

async fn append_line(path: &Path, message: &Message) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    let mut file = tokio::fs::OpenOptions::new().append(true).create(true).open(path).await?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await
}

async fn rewrite_snapshot(path: &Path, messages: &[Message]) -> std::io::Result<()> {
    let mut buf = String::new();
    for message in messages {
        buf.push_str(&serde_json::to_string(message)?);
        buf.push('\n');
    }
    atomic_write_local(path, buf.as_bytes()).await.map_err(|e| std::io::Error::other(e.to_string()))
}

impl HistoryLog {
    /// Spawns the actor owning `path`: it loads whatever's already on disk
    /// before serving its first command, then persists every mutation back
    /// to the same file (spec.md §6 "append-only framed newline-delimited
    /// JSON per workspace").
    pub fn new(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::channel::<HistoryCmd>(256);
        tokio::spawn(async move {
            let mut actor = Actor::load(path).await;
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    HistoryCmd::Append { message, reply } => {
                        let appended = actor.append(message);
                        actor.append_to_disk(&appended).await;
                        let _ = reply.send(appended);
                    }
                    HistoryCmd::Snapshot { reply } => {
                        let _ = reply.send(actor.messages.clone());
                    }
                    HistoryCmd::TruncateAfter { id, reply } => {
                        let result = actor.truncate_after(&id);
                        if result.is_ok() {
                            actor.persist_snapshot().await;
                        }
                        let _ = reply.send(result);
                    }
                    HistoryCmd::ClearAll { reply } => {
                        let removed = actor.clear_all();
                        actor.persist_snapshot().await;
                        let _ = reply.send(removed);
                    }
                }
            }
        });
        Self { tx }
    }

    /// Appends `pending`, assigning the next dense sequence number.
    pub async fn append(&self, pending: PendingMessage) -> Message {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(HistoryCmd::Append { message: pending, reply }).await;
        rx.await.expect("history actor dropped the append reply")
    }

    /// Returns every message currently in the log, in order.
    pub async fn snapshot(&self) -> Vec<Message> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(HistoryCmd::Snapshot { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Drops every entry strictly after the message with `id`. Returns the
    /// dropped sequence numbers, or [`HistoryError::NotFound`] if `id`
    /// isn't present.
    pub async fn truncate_after(&self, id: &str) -> Result<Vec<u64>, HistoryError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HistoryCmd::TruncateAfter { id: id.to_string(), reply })
            .await;
        rx.await.expect("history actor dropped the truncate reply")
    }

    /// Atomically empties the log, returning the sequence numbers that were
    /// deleted so callers can emit a single contiguous delete event
    /// (spec.md §3/§4.4 step 3).
    pub async fn clear_all(&self) -> Vec<u64> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(HistoryCmd::ClearAll { reply }).await;
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pending(id: &str) -> PendingMessage {
        PendingMessage {
            id: id.to_string(),
            role: Role::User,
            parts: vec![Part::Text { text: "hi".to_string() }],
            metadata: MessageMetadata::default(),
        }
    }

    fn history_path() -> PathBuf {
        tempfile::tempdir().unwrap().into_path().join("history.jsonl")
    }

    #[tokio::test]
    async fn sequences_are_dense_and_strictly_increasing() {
        let log = HistoryLog::new(history_path());
        let m0 = log.append(pending("a")).await;
        let m1 = log.append(pending("b")).await;
        let m2 = log.append(pending("c")).await;
        assert_eq!(m0.history_sequence, 0);
        assert_eq!(m1.history_sequence, 1);
        assert_eq!(m2.history_sequence, 2);
    }

    #[tokio::test]
    async fn clear_all_returns_every_deleted_sequence() {
        let log = HistoryLog::new(history_path());
        log.append(pending("a")).await;
        log.append(pending("b")).await;
        log.append(pending("c")).await;
        let deleted = log.clear_all().await;
        assert_eq!(deleted, vec![0, 1, 2]);
        assert!(log.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn truncate_after_drops_a_contiguous_suffix() {
        let log = HistoryLog::new(history_path());
        log.append(pending("a")).await;
        log.append(pending("b")).await;
        log.append(pending("c")).await;
        let deleted = log.truncate_after("a").await.unwrap();
        assert_eq!(deleted, vec![1, 2]);
        let remaining = log.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a");
    }

    #[tokio::test]
    async fn truncate_after_unknown_id_is_not_found() {
        let log = HistoryLog::new(history_path());
        log.append(pending("a")).await;
        let err = log.truncate_after("missing").await.unwrap_err();
        assert_eq!(err, HistoryError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn appends_are_persisted_as_framed_ndjson() {
        let path = history_path();
        let log = HistoryLog::new(path.clone());
        log.append(pending("a")).await;
        log.append(pending("b")).await;
        // Give the actor's disk write a moment to land; the reply channel
        // only guarantees the in-memory append, not the flush.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines.len(), 2);
        let first: Message = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.history_sequence, 0);
    }

    #[tokio::test]
    async fn reloading_from_disk_resumes_sequence_numbers() {
        let path = history_path();
        {
            let log = HistoryLog::new(path.clone());
            log.append(pending("a")).await;
            log.append(pending("b")).await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let log = HistoryLog::new(path);
        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].history_sequence, 1);

        let next = log.append(pending("c")).await;
        assert_eq!(next.history_sequence, 2);
    }

    #[tokio::test]
    async fn clear_all_rewrites_the_file_to_empty() {
        let path = history_path();
        let log = HistoryLog::new(path.clone());
        log.append(pending("a")).await;
        log.append(pending("b")).await;
        log.clear_all().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.lines().all(|l| l.trim().is_empty()));
    }
}
