//! Pure helpers for history compaction (spec.md §4.4 "Compaction-request
//! handling", the hard part). Kept free of the history log / broadcast
//! plumbing so the usage-aggregation and summary-metadata math can be
//! tested in isolation, mirroring how `codex-rs/core/src/codex/compact.rs`
//! separates the turn-loop from the summarization prompt itself.

use mux_protocol::{Message, MessageMetadata, MuxMetadata, MuxMetadataType, Role, Usage};

/// Appended to a partial assistant message's collected text when a
/// compaction is driven by `stream-abort` rather than a clean `stream-end`
/// (spec.md §4.4 step "Two accept paths").
pub const TRUNCATED_SENTINEL: &str = "\n\n[truncated]";

/// Cumulative usage across every assistant message in `history`, carrying
/// forward any prior compaction's `historicalUsage` so repeated compactions
/// keep accumulating rather than resetting (spec.md §4.4 step 2). Order is
/// preserving: a message earlier in `history` contributes to the running
/// total before a later one, so an old compacted summary's own
/// `historical_usage` is folded in before the messages that came after it.
pub fn aggregate_historical_usage(history: &[Message]) -> Usage {
    let mut total = Usage::default();
    for message in history {
        if let Some(historical) = &message.metadata.historical_usage {
            total = total.combine(historical);
        }
        if message.role == Role::Assistant {
            if let Some(usage) = &message.metadata.usage {
                total = total.combine(usage);
            }
        }
    }
    total
}

/// Builds the metadata for the single assistant summary message a
/// compaction appends (spec.md §4.4 step 4): `compacted = true`, the
/// aggregated `historicalUsage`, and `muxMetadata.type = normal` so the
/// summary itself never looks like another compaction request.
pub fn summary_metadata(
    model: Option<String>,
    usage: Option<Usage>,
    historical_usage: Usage,
    provider_metadata: Option<serde_json::Value>,
    duration_ms: Option<u64>,
    system_message_tokens: Option<u64>,
) -> MessageMetadata {
    MessageMetadata {
        model,
        usage,
        historical_usage: Some(historical_usage),
        provider_metadata,
        duration_ms,
        system_message_tokens,
        compacted: true,
        mux_metadata: Some(MuxMetadata {
            kind: MuxMetadataType::Normal,
            continue_message: None,
            raw_command: None,
        }),
    }
}

/// True iff `message.metadata.mux_metadata` marks a compaction request
/// (spec.md §4.4).
pub fn is_compaction_request(message: &Message) -> bool {
    message
        .metadata
        .mux_metadata
        .as_ref()
        .is_some_and(|m| m.kind == MuxMetadataType::CompactionRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_protocol::Part;
    use pretty_assertions::assert_eq;

    fn assistant_with_usage(seq: u64, input: u64, output: u64, total: u64) -> Message {
        Message {
            id: format!("a{seq}"),
            role: Role::Assistant,
            parts: vec![Part::Text { text: "x".to_string() }],
            metadata: MessageMetadata {
                usage: Some(Usage { input_tokens: input, output_tokens: output, total_tokens: total }),
                ..Default::default()
            },
            history_sequence: seq,
        }
    }

    #[test]
    fn scenario_3_aggregates_two_assistant_usages() {
        let user_one = Message {
            id: "u1".to_string(),
            role: Role::User,
            parts: vec![Part::Text { text: "hi".to_string() }],
            metadata: MessageMetadata::default(),
            history_sequence: 0,
        };
        let history = vec![
            user_one.clone(),
            assistant_with_usage(1, 10, 90, 100),
            Message { history_sequence: 2, id: "u2".to_string(), ..user_one.clone() },
            assistant_with_usage(3, 20, 180, 200),
        ];
        let total = aggregate_historical_usage(&history);
        assert_eq!(total.total_tokens, 300);
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 270);
    }

    #[test]
    fn prior_compacted_summary_usage_is_folded_in_order_preserving() {
        let prior_summary = Message {
            id: "s1".to_string(),
            role: Role::Assistant,
            parts: vec![Part::Text { text: "SUMMARY".to_string() }],
            metadata: summary_metadata(
                None,
                Some(Usage { input_tokens: 1, output_tokens: 1, total_tokens: 2 }),
                Usage { input_tokens: 30, output_tokens: 270, total_tokens: 300 },
                None,
                None,
                None,
            ),
            history_sequence: 0,
        };
        let history = vec![prior_summary, assistant_with_usage(1, 5, 5, 10)];
        let total = aggregate_historical_usage(&history);
        // prior historical_usage (300) + prior summary's own usage (2) + new assistant (10)
        assert_eq!(total.total_tokens, 312);
    }

    #[test]
    fn is_compaction_request_detects_the_marker() {
        let mut msg = Message {
            id: "u1".to_string(),
            role: Role::User,
            parts: vec![],
            metadata: MessageMetadata::default(),
            history_sequence: 0,
        };
        assert!(!is_compaction_request(&msg));
        msg.metadata.mux_metadata = Some(MuxMetadata {
            kind: MuxMetadataType::CompactionRequest,
            continue_message: None,
            raw_command: None,
        });
        assert!(is_compaction_request(&msg));
    }
}
