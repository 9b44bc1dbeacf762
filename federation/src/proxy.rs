//! Router-level middleware that intercepts operations whose primary id
//! decodes as `remote.<serverId>.<remoteId>` and transparently forwards
//! them to the named peer (spec.md §4.6). Everything upstream of this
//! module (the RPC router itself) is out of scope; this crate only owns
//! the decode/forward/re-encode plumbing.

use std::sync::Arc;

use mux_protocol::{remote_id, MuxError, Result};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::id_rewrite::{decode_ids_inbound, encode_ids_outbound};
use crate::remote_client::{RemoteClientFactory, ServerRegistry, StreamChunk};

/// Transparent forwarder: given a primary id that might name a remote
/// entity, decodes it, resolves the peer, forwards the operation with the
/// bare remote id, and re-encodes every id-bearing field in the response
/// before handing it back.
pub struct FederationProxy {
    registry: Arc<dyn ServerRegistry>,
    factory: Arc<dyn RemoteClientFactory>,
}

impl FederationProxy {
    pub fn new(registry: Arc<dyn ServerRegistry>, factory: Arc<dyn RemoteClientFactory>) -> Self {
        Self { registry, factory }
    }

    /// `None` means `primary_id` isn't a remote id at all — the caller
    /// should fall through to the local `WorkspaceService` path instead of
    /// treating this as a federation error.
    pub fn should_forward(&self, primary_id: &str) -> bool {
        remote_id::is_remote_id(primary_id)
    }

    /// Forwards a single (non-streaming) operation. `input` is the
    /// caller's original request payload, still carrying encoded remote
    /// ids (including, typically, `primary_id` itself under whichever
    /// field named it); every id-bearing field is decoded before the call
    /// and every id-bearing field in the response is re-encoded for this
    /// server before returning (spec.md §4.6).
    pub async fn forward(&self, primary_id: &str, operation: &str, input: Value) -> Result<Value> {
        let (server_id, _remote_id) = remote_id::decode(primary_id)
            .ok_or_else(|| MuxError::network(format!("{primary_id} is not a remote id")))?;

        let config = self.registry.resolve(&server_id).await?;
        let client = self.factory.client_for(&config);

        let decoded_input = decode_ids_inbound(&input);
        let output = client.call(operation, decoded_input).await?;
        Ok(encode_ids_outbound(&output, &server_id))
    }

    /// Forwards a streaming operation, re-encoding ids on every chunk as it
    /// arrives, and forwarding `abort` through to the upstream client so a
    /// local cancellation propagates across the federation boundary
    /// (spec.md §5).
    pub async fn forward_stream(
        &self,
        primary_id: &str,
        operation: &str,
        input: Value,
        abort: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let (server_id, _remote_id) = remote_id::decode(primary_id)
            .ok_or_else(|| MuxError::network(format!("{primary_id} is not a remote id")))?;

        let config = self.registry.resolve(&server_id).await?;
        let client = self.factory.client_for(&config);
        let decoded_input = decode_ids_inbound(&input);
        let mut upstream = client.stream(operation, decoded_input, abort).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Some(chunk) = upstream.recv().await {
                let rewritten = match chunk {
                    StreamChunk::Data(value) => StreamChunk::Data(encode_ids_outbound(&value, &server_id)),
                    StreamChunk::End => StreamChunk::End,
                };
                if tx.send(rewritten).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
