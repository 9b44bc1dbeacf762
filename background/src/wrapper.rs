//! Pure string-building for the background spawn protocol (spec.md §4.3).
//! Kept free of any process-spawning so the shape of the generated scripts
//! can be asserted on directly in tests.

use std::collections::BTreeMap;
use std::path::Path;

use mux_protocol::quoting::posix_quote;

/// Builds the wrapper script that actually runs inside `bash -c`: a trap
/// that writes `$?` to `<outputDir>/exit_code` on EXIT, a `cd` into the
/// working directory, `export`s for every env var, then the user's script.
/// Joined with `&&` per spec.md §4.3 step 1.
pub fn build_wrapper_script(
    script: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    exit_code_path: &Path,
) -> String {
    let mut pieces = Vec::new();

    // Stash the exit-code path in a variable first so the trap body never
    // has to nest single-quoted strings inside its own single-quoted
    // argument to `trap`.
    pieces.push(format!(
        "MUX_EXIT_CODE_FILE={}",
        posix_quote(&exit_code_path.to_string_lossy())
    ));
    pieces.push("trap 'echo \"$?\" > \"$MUX_EXIT_CODE_FILE\"' EXIT".to_string());
    pieces.push(format!("cd {}", posix_quote(&cwd.to_string_lossy())));
    for (key, value) in env {
        pieces.push(format!("export {key}={}", posix_quote(value)));
    }
    pieces.push(script.to_string());

    pieces.join(" && ")
}

/// Builds the Unix spawn command from spec.md §4.3 step 2: a subshell that
/// enables job control (`set -m`) so the backgrounded job gets its own
/// process group, optionally renices it, runs it under `nohup` so it
/// survives the parent exiting, redirects merged output into `output.log`
/// while also keeping split `stdout`/`stderr` files, and finally looks up
/// the child's pgid (`ps` → `/proc` → fallback to the pid) and prints
/// `"<pid> <pgid>"` for the caller to parse.
pub fn build_spawn_command_unix(wrapper_script: &str, output_dir: &Path, niceness: Option<i32>) -> String {
    let quoted_wrapper = posix_quote(wrapper_script);
    let stdout_path = posix_quote(&output_dir.join("stdout").to_string_lossy());
    let stderr_path = posix_quote(&output_dir.join("stderr").to_string_lossy());
    let log_path = posix_quote(&output_dir.join("output.log").to_string_lossy());

    let nice_prefix = niceness
        .map(|n| format!("nice -n {n} "))
        .unwrap_or_default();

    format!(
        "( set -m; {nice_prefix}nohup bash -c {quoted_wrapper} \
         > >(tee {stdout_path} >> {log_path}) \
         2> >(tee {stderr_path} >> {log_path} >&2) \
         < /dev/null & \
         CHILD_PID=$!; \
         PGID=$(ps -o pgid= -p \"$CHILD_PID\" 2>/dev/null | tr -d ' '); \
         if [ -z \"$PGID\" ]; then PGID=$(awk '{{print $5}}' /proc/\"$CHILD_PID\"/stat 2>/dev/null); fi; \
         if [ -z \"$PGID\" ]; then PGID=\"$CHILD_PID\"; fi; \
         echo \"$CHILD_PID $PGID\" )"
    )
}

/// Windows/MSYS spawn command: no `set -m`/`setsid`, relying on bash's own
/// group semantics for the child (spec.md §4.3 step 2).
pub fn build_spawn_command_windows(wrapper_script: &str, output_dir: &Path) -> String {
    let quoted_wrapper = posix_quote(wrapper_script);
    let stdout_path = posix_quote(&output_dir.join("stdout").to_string_lossy());
    let stderr_path = posix_quote(&output_dir.join("stderr").to_string_lossy());
    let log_path = posix_quote(&output_dir.join("output.log").to_string_lossy());

    format!(
        "( bash -c {quoted_wrapper} \
         > >(tee {stdout_path} >> {log_path}) \
         2> >(tee {stderr_path} >> {log_path} >&2) \
         < /dev/null & \
         CHILD_PID=$!; \
         echo \"$CHILD_PID $CHILD_PID\" )"
    )
}

/// Parses the `"<pid> <pgid>"` line printed by the spawn command.
/// Whitespace-tolerant per spec.md §6.
pub fn parse_pid_pgid(stdout: &str) -> Option<(u32, u32)> {
    let mut parts = stdout.split_whitespace();
    let pid: u32 = parts.next()?.parse().ok()?;
    let pgid: u32 = parts.next()?.parse().ok()?;
    Some((pid, pgid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn wrapper_script_joins_pieces_with_and() {
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar baz".to_string());
        let script = build_wrapper_script(
            "echo hi",
            Path::new("/work/dir"),
            &env,
            Path::new("/work/out/exit_code"),
        );
        assert!(script.contains("trap 'echo \"$?\" > \"$MUX_EXIT_CODE_FILE\"' EXIT"));
        assert!(script.contains("cd '/work/dir'"));
        assert!(script.contains("export FOO='bar baz'"));
        assert!(script.ends_with("echo hi"));
        assert!(script.contains(" && "));
    }

    #[test]
    fn parse_pid_pgid_handles_whitespace() {
        assert_eq!(parse_pid_pgid("123 456"), Some((123, 456)));
        assert_eq!(parse_pid_pgid("  123   456  \n"), Some((123, 456)));
        assert_eq!(parse_pid_pgid("not-a-number 456"), None);
        assert_eq!(parse_pid_pgid(""), None);
    }

    #[test]
    fn unix_spawn_command_includes_nice_and_output_paths() {
        let wrapper = "echo hi";
        let out = PathBuf::from("/tmp/out");
        let cmd = build_spawn_command_unix(wrapper, &out, Some(10));
        assert!(cmd.contains("nice -n 10"));
        assert!(cmd.contains("set -m"));
        assert!(cmd.contains("nohup bash -c"));
        assert!(cmd.contains("/tmp/out/stdout"));
        assert!(cmd.contains("/tmp/out/stderr"));
        assert!(cmd.contains("/tmp/out/output.log"));
    }

    #[test]
    fn unix_spawn_command_omits_nice_when_not_requested() {
        let cmd = build_spawn_command_unix("echo hi", Path::new("/tmp/out"), None);
        assert!(!cmd.contains("nice -n"));
    }
}
