//! Federation's opaque id codec: `remote.<serverId>.<remoteId>` (spec.md
//! §4.6/§6). `serverId` is restricted to `[A-Za-z0-9._-]+`; `remoteId` is
//! everything after the second dot, preserved verbatim modulo outer
//! trimming, which is why we split rather than fully regex-match here.

const PREFIX: &str = "remote.";

fn server_id_is_valid(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Decode a namespaced remote id into `(serverId, remoteId)`. Returns
/// `None` if `s` doesn't match the `remote.<serverId>.<remoteId>` grammar.
pub fn decode(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix(PREFIX)?;
    let (server, remote) = rest.split_once('.')?;
    if !server_id_is_valid(server) {
        return None;
    }
    let remote = remote.trim();
    if remote.is_empty() {
        return None;
    }
    Some((server.to_string(), remote.to_string()))
}

/// True iff `s` is already a well-formed remote id.
pub fn is_remote_id(s: &str) -> bool {
    decode(s).is_some()
}

/// Encode `remote_id` as belonging to `server_id`. Idempotent: if
/// `remote_id` is already an encoded remote id (of any server), it is
/// returned unchanged rather than double-wrapped.
pub fn encode(server_id: &str, remote_id: &str) -> String {
    if is_remote_id(remote_id) {
        remote_id.to_string()
    } else {
        format!("{PREFIX}{server_id}.{remote_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_well_formed_ids() {
        for id in ["remote.S.W", "remote.my-server.task-123", "remote.a.b.c.d"] {
            let (server, remote) = decode(id).unwrap_or_else(|| panic!("should decode {id}"));
            assert_eq!(encode(&server, &remote), id);
        }
    }

    #[test]
    fn encode_is_idempotent() {
        let once = encode("S", "W");
        let twice = encode("other-server", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode("not-remote").is_none());
        assert!(decode("remote.onlyonepart").is_none());
        assert!(decode("remote..empty-server").is_none());
        assert!(decode("remote.S.").is_none());
    }

    #[test]
    fn decode_trims_remote_id_whitespace() {
        let (server, remote) = decode("remote.S. W ").unwrap();
        assert_eq!(server, "S");
        assert_eq!(remote, "W");
    }
}
