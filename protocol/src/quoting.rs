//! POSIX shell quoting helpers shared by the background-process manager and
//! the SSH runtime variant (spec.md §4.3). These are intentionally
//! hand-rolled rather than delegated to `shlex::quote`: the exact escape
//! sequence (`'` -> `'"'"'`, empty string -> `''`) is a contract other
//! tooling reads alongside us, so it must be exact and not an
//! implementation detail of whichever quoting crate we happen to use.

/// Quote `s` for safe interpolation into a single-quoted shell string.
pub fn posix_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let escaped = s.replace('\'', r#"'"'"'"#);
    format!("'{escaped}'")
}

/// Inverse of [`posix_quote`]. Only understands `posix_quote`'s own output
/// shape (a single pair of enclosing quotes with `'"'"'` escapes inside) —
/// it is not a general shell-quoting parser.
pub fn posix_unquote(s: &str) -> Option<String> {
    if s == "''" {
        return Some(String::new());
    }
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace(r#"'"'"'"#, "'"))
}

/// Rewrite a leading `~` or `~/...` to `$HOME/...` for interpolation inside
/// a double-quoted remote-shell string (used when building SSH command
/// lines, where tilde expansion by the *local* shell never happens).
pub fn tilde_expand_ssh(path: &str) -> String {
    if path == "~" {
        "$HOME".to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("$HOME/{rest}")
    } else {
        path.to_string()
    }
}

/// Join a command's argv into a single shell string using POSIX quoting for
/// every argument. Used when building wrapper scripts that must embed a
/// user-provided command verbatim.
pub fn quote_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| posix_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_unquote_round_trips() {
        let cases = [
            "",
            "plain",
            "has space",
            "it's",
            "''already-quoted''",
            "\n",
            "$HOME",
            "a'b'c",
        ];
        for s in cases {
            let quoted = posix_quote(s);
            let recovered = posix_unquote(&quoted).expect("unquote should succeed");
            assert_eq!(recovered, s, "round trip failed for {s:?}");
        }
    }

    #[test]
    fn empty_string_quotes_to_empty_quotes() {
        assert_eq!(posix_quote(""), "''");
    }

    #[test]
    fn tilde_expansion_rewrites_home_relative_paths() {
        assert_eq!(tilde_expand_ssh("~/work"), "$HOME/work");
        assert_eq!(tilde_expand_ssh("~"), "$HOME");
        assert_eq!(tilde_expand_ssh("/abs/path"), "/abs/path");
        assert_eq!(tilde_expand_ssh("rel/path"), "rel/path");
    }

    #[test]
    fn quote_command_joins_with_spaces() {
        let argv = vec!["echo".to_string(), "hi there".to_string()];
        assert_eq!(quote_command(&argv), "'echo' 'hi there'");
    }
}
