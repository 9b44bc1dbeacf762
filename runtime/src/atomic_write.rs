//! Write-to-temp-then-rename, shared across every local-filesystem-backed
//! path in this crate (spec.md §4.1). Grounded on the append/rename pattern
//! used for rollout history files and compaction in the teacher's session
//! recorder.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use mux_protocol::{MuxError, Result};

fn epoch_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Resolves the path a write should actually land on: if `path` is a
/// symlink, the write goes through to whatever it resolves to rather than
/// replacing the link itself (spec.md §4.1 "symlinks resolved and written
/// through"). A broken symlink (or anything else) falls back to `path`
/// unchanged.
async fn resolve_write_target(path: &Path) -> PathBuf {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            tokio::fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// Writes `contents` to `path` atomically on the local filesystem: the
/// bytes land in a sibling `<resolved>.tmp.<epoch>` file first, which is
/// then renamed over the resolved target. Parent directories are created on
/// demand. If a file already exists at the target, its permissions are
/// carried onto the temp file before the rename so the write doesn't
/// silently tighten or loosen the target's mode (spec.md §4.1 "target
/// permissions preserved where the file existed").
pub async fn atomic_write_local(path: &Path, contents: &[u8]) -> Result<()> {
    let target = resolve_write_target(path).await;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MuxError::file_io(format!("create_dir_all {}: {e}", parent.display())))?;
    }
    let existing_permissions = tokio::fs::metadata(&target).await.ok().map(|m| m.permissions());

    let tmp_path = PathBuf::from(format!("{}.tmp.{}", target.display(), epoch_nanos()));
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| MuxError::file_io(format!("write {}: {e}", tmp_path.display())))?;
    if let Some(permissions) = existing_permissions {
        tokio::fs::set_permissions(&tmp_path, permissions)
            .await
            .map_err(|e| MuxError::file_io(format!("set_permissions {}: {e}", tmp_path.display())))?;
    }
    tokio::fs::rename(&tmp_path, &target)
        .await
        .map_err(|e| MuxError::file_io(format!("rename {} -> {}: {e}", tmp_path.display(), target.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn writes_and_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        atomic_write_local(&path, b"{\"a\":1}").await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"a\":1}");

        atomic_write_local(&path, b"{\"a\":2}").await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"a\":2}");

        let leftover: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftover.is_empty(), "temp file should not survive a successful write");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn preserves_the_existing_target_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).await.unwrap();

        atomic_write_local(&path, b"{\"a\":1}").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn writes_through_a_symlink_rather_than_replacing_it() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.json");
        tokio::fs::write(&real, b"{}").await.unwrap();
        let link = dir.path().join("link.json");
        tokio::fs::symlink(&real, &link).await.unwrap();

        atomic_write_local(&link, b"{\"a\":1}").await.unwrap();

        assert_eq!(tokio::fs::read(&real).await.unwrap(), b"{\"a\":1}");
        let link_meta = tokio::fs::symlink_metadata(&link).await.unwrap();
        assert!(link_meta.file_type().is_symlink(), "the symlink itself must survive the write");
    }
}
