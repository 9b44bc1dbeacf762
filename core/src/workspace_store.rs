//! Durable half of workspace identity: one TOML document per workspace
//! under `<mux_home>/workspaces/<id>.toml`, written atomically (spec.md
//! SPEC_FULL §1 "Configuration"). [`WorkspaceService`](crate::workspace_service::WorkspaceService)
//! keeps an in-memory index on top of this for fast `(project_path, name)`
//! uniqueness checks; this module only knows how to get one record to and
//! from disk.

use std::path::Path;

use mux_protocol::{MuxError, Result, WorkspaceMetadata};
use mux_runtime::atomic_write::atomic_write_local;
use serde::Deserialize;

use crate::mux_home::{workspace_metadata_path, workspaces_dir};

/// Recognized `runtime_config.type` discriminants. A persisted config
/// whose discriminant falls outside this set was written by a newer mux
/// than this build understands (spec.md §7 `incompatible_runtime`) — that
/// case is distinguished from an ordinary parse error so it can surface
/// the "upgrade mux" message instead of a generic TOML error.
const KNOWN_RUNTIME_KINDS: &[&str] = &["local", "worktree", "ssh", "container"];

fn parse_metadata(text: &str, path: &Path) -> Result<WorkspaceMetadata> {
    let raw: toml::Value =
        toml::from_str(text).map_err(|e| MuxError::file_io(format!("parsing {}: {e}", path.display())))?;
    if let Some(kind) = raw.get("runtime_config").and_then(|c| c.get("type")).and_then(|t| t.as_str()) {
        if !KNOWN_RUNTIME_KINDS.contains(&kind) {
            return Err(MuxError::IncompatibleRuntime);
        }
    }
    WorkspaceMetadata::deserialize(raw).map_err(|e| MuxError::file_io(format!("parsing {}: {e}", path.display())))
}

/// Persists `metadata` to `<mux_home>/workspaces/<id>.toml`, creating the
/// directory on demand. Single-writer atomic-rename, same as every other
/// config write in this workspace (spec.md §5).
pub async fn save(mux_home: &Path, metadata: &WorkspaceMetadata) -> Result<()> {
    let path = workspace_metadata_path(mux_home, &metadata.id);
    let toml_text = toml::to_string_pretty(metadata)
        .map_err(|e| MuxError::file_io(format!("serializing workspace metadata: {e}")))?;
    atomic_write_local(&path, toml_text.as_bytes()).await
}

/// Loads a single workspace's metadata by id.
pub async fn load(mux_home: &Path, workspace_id: &str) -> Result<WorkspaceMetadata> {
    let path = workspace_metadata_path(mux_home, workspace_id);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| MuxError::WorkspaceNotFound(workspace_id.to_string()))?;
    let text = String::from_utf8_lossy(&bytes);
    parse_metadata(&text, &path)
}

/// Loads every persisted workspace's metadata. Missing or unreadable
/// entries are skipped with a warning rather than failing the whole scan —
/// one corrupt file shouldn't hide every other workspace.
pub async fn load_all(mux_home: &Path) -> Result<Vec<WorkspaceMetadata>> {
    let dir = workspaces_dir(mux_home);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MuxError::file_io(format!("reading {}: {e}", dir.display()))),
    };

    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MuxError::file_io(format!("iterating {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) => match parse_metadata(&String::from_utf8_lossy(&bytes), &path) {
                Ok(metadata) => out.push(metadata),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparseable workspace metadata"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable workspace metadata"),
        }
    }
    Ok(out)
}

/// Deletes a workspace's persisted metadata. Tolerates the file already
/// being gone.
pub async fn delete(mux_home: &Path, workspace_id: &str) -> Result<()> {
    let path = workspace_metadata_path(mux_home, workspace_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MuxError::file_io(format!("removing {}: {e}", path.display()))),
    }
}
