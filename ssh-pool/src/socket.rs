//! Deterministic SSH multiplex socket naming (spec.md §4.2/§6):
//! `mux-ssh-<hex12(SHA-256(user:host:port:identityFile))>` in the OS temp
//! dir. Stable across processes (so every workspace on the same host shares
//! one multiplexed transport) and user-scoped (so two local users on a
//! shared box don't collide).

use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::pool::Target;

/// Compute the multiplex control-socket path for `target`.
pub fn multiplex_socket_path(target: &Target) -> PathBuf {
    let identity = target.identity_file.as_deref().unwrap_or("");
    let input = format!(
        "{}:{}:{}:{}",
        target.local_user, target.host, target.port, identity
    );
    let digest = Sha256::digest(input.as_bytes());
    let hex12: String = hex::encode(digest).chars().take(12).collect();
    std::env::temp_dir().join(format!("mux-ssh-{hex12}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(user: &str, host: &str, port: u16, identity: Option<&str>) -> Target {
        Target {
            local_user: user.to_string(),
            host: host.to_string(),
            port,
            identity_file: identity.map(str::to_string),
        }
    }

    #[test]
    fn socket_path_is_deterministic() {
        let t = target("alice", "example.com", 22, None);
        let a = multiplex_socket_path(&t);
        let b = multiplex_socket_path(&t);
        assert_eq!(a, b);
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("mux-ssh-")
        );
    }

    #[test]
    fn different_targets_hash_differently() {
        let a = multiplex_socket_path(&target("alice", "host-a", 22, None));
        let b = multiplex_socket_path(&target("alice", "host-b", 22, None));
        assert_ne!(a, b);
    }

    #[test]
    fn src_base_dir_has_no_bearing_on_key() {
        // Target intentionally carries no src_base_dir field at all, so two
        // workspaces on the same host always share a socket.
        let a = target("alice", "host", 22, Some("~/.ssh/id"));
        let b = target("alice", "host", 22, Some("~/.ssh/id"));
        assert_eq!(multiplex_socket_path(&a), multiplex_socket_path(&b));
    }
}
