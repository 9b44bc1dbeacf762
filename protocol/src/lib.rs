//! Shared data model, error taxonomy, and wire-level helpers for the mux
//! workspace runtime. Every other crate in this workspace depends on this
//! one; it depends on nothing else in the workspace.

pub mod coder_name;
pub mod error;
pub mod message;
pub mod quoting;
pub mod remote_id;
pub mod workspace_config;
pub mod workspace_metadata;

pub use error::{MuxError, Result, SendMessageError};
pub use message::{Message, MessageMetadata, MuxMetadata, MuxMetadataType, Part, Role, Usage};
pub use workspace_config::{expand_tilde, normalize_path, workspace_path, ManagedRemoteConfig, WorkspaceConfig};
pub use workspace_metadata::{is_valid_workspace_name, AiSettings, WorkspaceMetadata};

/// Exit code sentinels for background/exec processes (spec.md §6).
pub mod exit_codes {
    pub const ABORTED: i32 = -2;
    pub const TIMEOUT: i32 = -3;
    pub const SIGKILL: i32 = 137;
    pub const SIGTERM: i32 = 143;
}

/// Non-interactive environment injected into every `exec` call (spec.md §6).
pub fn noninteractive_env() -> Vec<(String, String)> {
    vec![
        ("CI".to_string(), "1".to_string()),
        ("NO_COLOR".to_string(), "1".to_string()),
    ]
}
