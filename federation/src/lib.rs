//! Federation proxy (spec.md §4.6): transparent forwarding of agent-session
//! operations to remote mux peers by decoding namespaced ids, forwarding
//! the bare id, and rewriting ids across the boundary in both directions.
//! Grounded on spec.md §4.6's field list; no single teacher file owns this
//! shape since codex-core has no federation concept, so the depth-capped
//! `serde_json::Value` tree walk is built from the spec directly.

pub mod id_rewrite;
pub mod proxy;
pub mod remote_client;

pub use id_rewrite::{decode_ids_inbound, encode_ids_outbound, ID_FIELDS, MAX_DEPTH};
pub use proxy::FederationProxy;
pub use remote_client::{RemoteClient, RemoteClientFactory, RemoteServerConfig, ServerRegistry, StreamChunk};
