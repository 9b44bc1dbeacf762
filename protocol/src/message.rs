//! History-log message shape (spec.md §3). The log mechanics (append-only
//! sequencing, atomic clear-and-replace for compaction) live in
//! `mux-session`; this module only owns the wire shape so that
//! `mux-federation` can deserialize/rewrite it without depending on the
//! session crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: serde_json::Value },
    ToolResult { id: String, output: serde_json::Value },
    File { path: String, mime_type: Option<String> },
}

/// Tag carried on a user message to signal a special handling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxMetadataType {
    Normal,
    CompactionRequest,
    AgentSkill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxMetadata {
    #[serde(rename = "type")]
    pub kind: MuxMetadataType,
    /// For `CompactionRequest`: the message to auto-send once the
    /// compaction stream completes (spec.md §4.4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_message: Option<String>,
    /// Display text for a single queued compaction-request/agent-skill
    /// message (spec.md §4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_command: Option<String>,
}

/// Token/latency usage reported alongside a completed assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn combine(&self, other: &Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Cumulative usage carried across a compaction boundary (spec.md §4.4
    /// step 2): the sum of every assistant message's usage prior to the
    /// most recent compaction, so later compactions can keep accumulating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message_tokens: Option<u64>,
    #[serde(default)]
    pub compacted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux_metadata: Option<MuxMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    /// Monotonically assigned per-workspace sequence number. Dense and
    /// strictly increasing (spec.md §3/§8); assigned by the history log on
    /// append, not by the caller.
    pub history_sequence: u64,
}

impl Message {
    /// Concatenation of every `Part::Text` in order, used when collecting a
    /// completed assistant turn's text for compaction (spec.md §4.4).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_only_text_parts_in_order() {
        let msg = Message {
            id: "a1".to_string(),
            role: Role::Assistant,
            parts: vec![
                Part::Text { text: "hello ".to_string() },
                Part::ToolCall {
                    id: "t1".to_string(),
                    name: "x".to_string(),
                    arguments: serde_json::json!({}),
                },
                Part::Text { text: "world".to_string() },
            ],
            metadata: MessageMetadata::default(),
            history_sequence: 1,
        };
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn usage_combine_sums_fields() {
        let a = Usage { input_tokens: 1, output_tokens: 2, total_tokens: 3 };
        let b = Usage { input_tokens: 10, output_tokens: 20, total_tokens: 30 };
        let c = a.combine(&b);
        assert_eq!(c.input_tokens, 11);
        assert_eq!(c.output_tokens, 22);
        assert_eq!(c.total_tokens, 33);
    }
}
