//! The transport side of federation: a thin trait over "call a named
//! operation on a remote mux peer", so [`crate::proxy::FederationProxy`]
//! never depends on a concrete HTTP client. Production wiring supplies an
//! implementation against the RPC router named in spec.md §1 ("an RPC
//! router over HTTP with streaming iterators" — out of scope here, only its
//! interface is referenced); tests supply a fake.

use async_trait::async_trait;
use mux_protocol::Result;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// Resolved connection details for one remote mux peer (spec.md §4.6
/// "Resolve `(serverId → RemoteServer config, authToken?)`").
#[derive(Debug, Clone)]
pub struct RemoteServerConfig {
    pub server_id: String,
    pub base_url: String,
    pub auth_token: Option<String>,
}

/// Looks up a remote peer's connection details by `serverId`. Kept
/// separate from [`RemoteClientFactory`] so the registry (likely backed by
/// a settings file outside this crate's scope) and the transport
/// construction can vary independently.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn resolve(&self, server_id: &str) -> Result<RemoteServerConfig>;
}

/// One chunk of a streamed remote operation's response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Data(Value),
    End,
}

/// A transport-level client targeting one remote peer's `base_url`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Forwards `operation` with `input` (already id-decoded for this
    /// peer) and returns its single response value.
    async fn call(&self, operation: &str, input: Value) -> Result<Value>;

    /// Forwards a streaming operation; `abort` lets the proxy propagate a
    /// caller's cancellation to the upstream client (spec.md §5
    /// "Federation streams forward cancellation to the upstream client").
    async fn stream(&self, operation: &str, input: Value, abort: watch::Receiver<bool>) -> Result<mpsc::Receiver<StreamChunk>>;
}

/// Builds (or reuses) a [`RemoteClient`] for a resolved server config.
/// Construction is synchronous — building an HTTP client doesn't need to
/// suspend — so this isn't `#[async_trait]`.
pub trait RemoteClientFactory: Send + Sync {
    fn client_for(&self, config: &RemoteServerConfig) -> std::sync::Arc<dyn RemoteClient>;
}
