//! Depth-capped JSON tree walk that rewrites id-bearing fields across the
//! federation boundary (spec.md §4.6). Inputs are rewritten *inbound*
//! (decode a namespaced remote id back to the bare id the peer expects);
//! outputs and streaming event chunks are rewritten *outbound* (encode the
//! peer's bare id back into `remote.<serverId>.<x>`). The walk never
//! errors on a pathological payload — past the depth cap it just stops
//! rewriting that branch, degrading to "some nested ids unrewritten"
//! rather than a hard failure.

use serde_json::Value;

use mux_protocol::remote_id;

/// Field names treated as id-bearing wherever they appear in a payload,
/// per spec.md §4.6. This also covers the "legacy shape" where the id sits
/// at `result.metadata.id`: the walk matches by field name regardless of
/// nesting path, so `metadata.id` is rewritten the same as a top-level
/// `id`.
pub const ID_FIELDS: &[&str] = &[
    "id",
    "workspaceId",
    "parentWorkspaceId",
    "sectionId",
    "taskId",
    "task_id",
    "task_ids",
    "sourceWorkspaceId",
];

/// Nesting depth past which the walk stops descending (spec.md §4.6).
pub const MAX_DEPTH: usize = 20;

fn is_id_field(key: &str) -> bool {
    ID_FIELDS.contains(&key)
}

/// Decodes every id-bearing field in `value` that parses as a well-formed
/// remote id, replacing it with the bare remote id. Fields that aren't
/// well-formed remote ids (plain local ids passed through incidentally) are
/// left untouched.
pub fn decode_ids_inbound(value: &Value) -> Value {
    walk(value, 0, &|s| remote_id::decode(s).map(|(_, remote)| remote))
}

/// Encodes every id-bearing field in `value` as belonging to `server_id`.
/// Idempotent: a field that's already an encoded remote id (per
/// [`remote_id::encode`]) is left unchanged rather than double-wrapped.
pub fn encode_ids_outbound(value: &Value, server_id: &str) -> Value {
    walk(value, 0, &|s| Some(remote_id::encode(server_id, s)))
}

fn walk(value: &Value, depth: usize, transform: &dyn Fn(&str) -> Option<String>) -> Value {
    if depth >= MAX_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if is_id_field(key) {
                    out.insert(key.clone(), rewrite_id_value(v, transform));
                } else {
                    out.insert(key.clone(), walk(v, depth + 1, transform));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| walk(item, depth + 1, transform)).collect())
        }
        other => other.clone(),
    }
}

/// Rewrites the value held by an id-bearing field itself: a lone string
/// (`"id"`, `"workspaceId"`, ...) or an array of strings (`"task_ids"`).
/// Anything else (null, an object, a number) passes through unchanged —
/// it isn't actually an id in that shape.
fn rewrite_id_value(value: &Value, transform: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(s) => transform(s).map(Value::String).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rewrite_id_value(item, transform))
                .collect(),
        ),
        other => other.clone(),
    }
}
