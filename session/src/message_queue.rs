//! Pending-send accumulator for a workspace's `AgentSession` (spec.md §4.5).
//! A plain struct rather than an actor: unlike `HistoryLog` there is exactly
//! one writer (the session itself, already serialized by its own state
//! machine), so there's no need for a mailbox — just the invariants as
//! `Result`-returning methods and assertions for the cases that are
//! programmer errors rather than legitimate rejections.

use mux_protocol::{MuxMetadata, MuxMetadataType, Part, SendMessageError};

/// Model/tool-policy knobs threaded through to the AI streaming call.
/// `produce_message` returns whichever options were captured on the most
/// recent addition, overwriting any earlier ones (spec.md §4.5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub model: Option<String>,
    pub tool_policy: Option<String>,
}

/// The text, metadata, and images a drained queue produces for sending.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedMessage {
    pub text: String,
    pub mux_metadata: Option<MuxMetadata>,
    pub images: Vec<Part>,
    pub options: SendOptions,
}

fn kind_of(mux_metadata: &Option<MuxMetadata>) -> MuxMetadataType {
    mux_metadata.as_ref().map(|m| m.kind).unwrap_or(MuxMetadataType::Normal)
}

/// Ordered accumulator of not-yet-sent message texts, plus the first
/// captured `muxMetadata`, accumulated image parts, and the latest options
/// (spec.md §3 "MessageQueue state").
#[derive(Debug, Default)]
pub struct MessageQueue {
    texts: Vec<String>,
    first_mux_metadata: Option<MuxMetadata>,
    images: Vec<Part>,
    latest_options: SendOptions,
    has_agent_skill: bool,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty()
    }

    /// Adds a message to the queue. Empty text with no images is a silent
    /// no-op (spec.md §4.5). Otherwise enforces:
    /// - a compaction-request or agent-skill addition is rejected if the
    ///   queue already has any message;
    /// - once an agent-skill is queued, no further addition of any kind is
    ///   allowed;
    /// - the first `muxMetadata` seen is preserved across later adds;
    /// - later non-metadata options (`model`, `toolPolicy`) overwrite
    ///   earlier ones.
    pub fn add(
        &mut self,
        text: String,
        images: Vec<Part>,
        mux_metadata: Option<MuxMetadata>,
        options: SendOptions,
    ) -> Result<(), SendMessageError> {
        if text.is_empty() && images.is_empty() {
            return Ok(());
        }

        if self.has_agent_skill {
            return Err(SendMessageError::QueueRejected(
                "Cannot add message: an agent skill invocation is already queued.".to_string(),
            ));
        }

        let kind = kind_of(&mux_metadata);
        let queue_has_messages = !self.texts.is_empty();
        if queue_has_messages
            && matches!(kind, MuxMetadataType::CompactionRequest | MuxMetadataType::AgentSkill)
        {
            let what = if kind == MuxMetadataType::AgentSkill { "agent skill invocation" } else { "compaction request" };
            return Err(SendMessageError::QueueRejected(format!(
                "Cannot queue {what}: queue already has messages."
            )));
        }

        if kind == MuxMetadataType::AgentSkill {
            self.has_agent_skill = true;
        }
        if self.first_mux_metadata.is_none() {
            self.first_mux_metadata = mux_metadata;
        }
        if !text.is_empty() {
            self.texts.push(text);
        }
        self.images.extend(images);
        self.latest_options = options;
        Ok(())
    }

    /// The display/send text: a lone compaction-request or agent-skill
    /// shows its `rawCommand`; otherwise every queued text is joined by
    /// `\n` (spec.md §4.5 "Display").
    fn text(&self) -> String {
        if self.texts.len() == 1 {
            let kind = kind_of(&self.first_mux_metadata);
            if matches!(kind, MuxMetadataType::CompactionRequest | MuxMetadataType::AgentSkill) {
                if let Some(raw) = self.first_mux_metadata.as_ref().and_then(|m| m.raw_command.clone()) {
                    return raw;
                }
            }
        }
        self.texts.join("\n")
    }

    /// Produces the final joined text, the preserved `muxMetadata`, the
    /// latest options, and every accumulated image, without clearing the
    /// queue — callers drain explicitly via [`Self::clear`].
    pub fn produce_message(&self) -> ProducedMessage {
        ProducedMessage {
            text: self.text(),
            mux_metadata: self.first_mux_metadata.clone(),
            images: self.images.clone(),
            options: self.latest_options.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.texts.clear();
        self.first_mux_metadata = None;
        self.images.clear();
        self.latest_options = SendOptions::default();
        self.has_agent_skill = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compaction_metadata(raw: &str) -> MuxMetadata {
        MuxMetadata {
            kind: MuxMetadataType::CompactionRequest,
            continue_message: None,
            raw_command: Some(raw.to_string()),
        }
    }

    fn skill_metadata(raw: &str) -> MuxMetadata {
        MuxMetadata {
            kind: MuxMetadataType::AgentSkill,
            continue_message: None,
            raw_command: Some(raw.to_string()),
        }
    }

    #[test]
    fn empty_add_is_a_silent_no_op() {
        let mut q = MessageQueue::new();
        q.add(String::new(), vec![], None, SendOptions::default()).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn multiple_normal_messages_join_with_newline() {
        let mut q = MessageQueue::new();
        q.add("one".to_string(), vec![], None, SendOptions::default()).unwrap();
        q.add("two".to_string(), vec![], None, SendOptions::default()).unwrap();
        assert_eq!(q.produce_message().text, "one\ntwo");
    }

    #[test]
    fn first_mux_metadata_is_preserved_across_adds() {
        let mut q = MessageQueue::new();
        let first = MuxMetadata { kind: MuxMetadataType::Normal, continue_message: None, raw_command: None };
        q.add("one".to_string(), vec![], Some(first), SendOptions::default()).unwrap();
        q.add("two".to_string(), vec![], None, SendOptions::default()).unwrap();
        assert_eq!(q.produce_message().mux_metadata.unwrap().kind, MuxMetadataType::Normal);
    }

    #[test]
    fn latest_options_overwrite_earlier_ones() {
        let mut q = MessageQueue::new();
        q.add(
            "one".to_string(),
            vec![],
            None,
            SendOptions { model: Some("model-a".to_string()), tool_policy: None },
        )
        .unwrap();
        q.add(
            "two".to_string(),
            vec![],
            None,
            SendOptions { model: Some("model-b".to_string()), tool_policy: None },
        )
        .unwrap();
        assert_eq!(q.produce_message().options.model, Some("model-b".to_string()));
    }

    #[test]
    fn compaction_request_rejected_when_queue_non_empty() {
        let mut q = MessageQueue::new();
        q.add("one".to_string(), vec![], None, SendOptions::default()).unwrap();
        let err = q
            .add("/compact".to_string(), vec![], Some(compaction_metadata("/compact")), SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, SendMessageError::QueueRejected(_)));
    }

    #[test]
    fn agent_skill_rejected_onto_non_empty_queue_with_exact_message() {
        let mut q = MessageQueue::new();
        q.add("one".to_string(), vec![], None, SendOptions::default()).unwrap();
        let err = q
            .add("/skill".to_string(), vec![], Some(skill_metadata("/skill")), SendOptions::default())
            .unwrap_err();
        match err {
            SendMessageError::QueueRejected(msg) => {
                assert_eq!(msg, "Cannot queue agent skill invocation: queue already has messages.")
            }
            other => panic!("expected QueueRejected, got {other:?}"),
        }
    }

    #[test]
    fn nothing_may_follow_a_queued_agent_skill() {
        let mut q = MessageQueue::new();
        q.add("/skill".to_string(), vec![], Some(skill_metadata("/skill")), SendOptions::default()).unwrap();
        let err = q.add("anything".to_string(), vec![], None, SendOptions::default()).unwrap_err();
        assert!(matches!(err, SendMessageError::QueueRejected(_)));
    }

    #[test]
    fn single_compaction_request_displays_its_raw_command() {
        let mut q = MessageQueue::new();
        q.add(
            "ignored-internal-text".to_string(),
            vec![],
            Some(compaction_metadata("/compact please")),
            SendOptions::default(),
        )
        .unwrap();
        assert_eq!(q.produce_message().text, "/compact please");
    }

    #[test]
    fn clear_resets_every_field() {
        let mut q = MessageQueue::new();
        q.add("one".to_string(), vec![Part::File { path: "/x".to_string(), mime_type: None }], None, SendOptions::default()).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.produce_message().text, "");
        assert!(q.produce_message().images.is_empty());
    }
}
