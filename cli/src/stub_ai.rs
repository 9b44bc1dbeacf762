//! Stand-in `AiService` used only by this binary for manual smoke-testing.
//! spec.md §1 keeps the real provider SDKs out of scope; `AgentSession`
//! still needs something to stream against, so this echoes the caller's
//! last message back a few words at a time.

use std::sync::Arc;

use async_trait::async_trait;
use mux_core::AiServiceFactory;
use mux_protocol::{Message, MessageMetadata, Part, Result, Role, WorkspaceMetadata};
use mux_session::{AiService, AiStream, StreamEvent, StreamRequestOptions};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub struct EchoAiService;

#[async_trait]
impl AiService for EchoAiService {
    async fn stream(&self, history: Vec<Message>, _options: StreamRequestOptions) -> Result<AiStream> {
        let last_user_text = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(16);
        let (abort_tx, abort_rx) = watch::channel(false);

        tokio::spawn(async move {
            if tx.send(StreamEvent::StreamStart).await.is_err() {
                return;
            }
            let reply = format!("echo: {last_user_text}");
            for word in reply.split_inclusive(' ') {
                if *abort_rx.borrow() {
                    let _ = tx.send(StreamEvent::StreamAbort { abandon_partial: false }).await;
                    return;
                }
                if tx.send(StreamEvent::StreamDelta { text: word.to_string() }).await.is_err() {
                    return;
                }
            }
            let message = Message {
                id: format!("asst-{}", Uuid::new_v4()),
                role: Role::Assistant,
                parts: vec![Part::Text { text: reply }],
                metadata: MessageMetadata::default(),
                history_sequence: 0,
            };
            let _ = tx.send(StreamEvent::StreamEnd { message }).await;
        });

        Ok(AiStream { events: rx, abort: abort_tx })
    }
}

pub struct EchoAiServiceFactory;

impl AiServiceFactory for EchoAiServiceFactory {
    fn build(&self, _metadata: &WorkspaceMetadata) -> Arc<dyn AiService> {
        Arc::new(EchoAiService)
    }
}
