//! Spawn protocol entry point (spec.md §4.3 step 1-3): build the wrapper
//! script, build the OS-appropriate spawn command, run it through the
//! caller's [`Runtime`], and parse back the `"<pid> <pgid>"` line it prints.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use mux_protocol::quoting::posix_quote;
use mux_protocol::{MuxError, Result};
use mux_runtime::{ExecOptions, Runtime};
use tokio::io::AsyncReadExt;

use crate::handle::BackgroundHandle;
use crate::wrapper::{build_spawn_command_unix, build_spawn_command_windows, build_wrapper_script, parse_pid_pgid};

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub script: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub output_dir: PathBuf,
    pub niceness: Option<i32>,
    pub is_windows: bool,
}

impl SpawnOptions {
    pub fn new(script: impl Into<String>, cwd: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            script: script.into(),
            cwd,
            env: HashMap::new(),
            output_dir,
            niceness: None,
            is_windows: false,
        }
    }
}

/// Spawns `opts.script` as a detached, orphaned background process under
/// `runtime`, returning a [`BackgroundHandle`] once the spawn command has
/// printed back its `"<pid> <pgid>"` line.
pub async fn spawn(runtime: Arc<dyn Runtime>, opts: SpawnOptions) -> Result<BackgroundHandle> {
    let mkdir_cmd = format!("mkdir -p {}", posix_quote(&opts.output_dir.to_string_lossy()));
    run_and_collect_stdout(&*runtime, &mkdir_cmd, &opts.cwd).await?;

    let env: BTreeMap<String, String> = opts.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let exit_code_path = opts.output_dir.join("exit_code");
    let wrapper = build_wrapper_script(&opts.script, &opts.cwd, &env, &exit_code_path);

    let spawn_command = if opts.is_windows {
        build_spawn_command_windows(&wrapper, &opts.output_dir)
    } else {
        build_spawn_command_unix(&wrapper, &opts.output_dir, opts.niceness)
    };

    let stdout = run_and_collect_stdout(&*runtime, &spawn_command, &opts.cwd).await?;
    let (pid, pgid) = parse_pid_pgid(stdout.trim())
        .ok_or_else(|| MuxError::exec(format!("could not parse pid/pgid from spawn output: {stdout:?}")))?;

    Ok(BackgroundHandle::new(runtime, opts.output_dir, pid, pgid))
}

async fn run_and_collect_stdout(runtime: &dyn Runtime, command: &str, cwd: &std::path::Path) -> Result<String> {
    let opts = ExecOptions { cwd: cwd.to_path_buf(), ..Default::default() };
    let mut stream = runtime.exec(command, opts).await?;

    let mut out = Vec::new();
    stream
        .stdout
        .read_to_end(&mut out)
        .await
        .map_err(|e| MuxError::exec(format!("reading spawn command stdout: {e}")))?;

    let code = stream
        .exit_code
        .await
        .map_err(|_| MuxError::exec("spawn command exit code channel dropped"))?;
    if code != 0 {
        let mut err_bytes = Vec::new();
        let _ = stream.stderr.read_to_end(&mut err_bytes).await;
        return Err(MuxError::exec(format!(
            "spawn command failed ({code}): {}",
            String::from_utf8_lossy(&err_bytes)
        )));
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_runtime::LocalMode;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn spawn_and_observe_short_lived_process() {
        let dir = tempfile::tempdir().unwrap();
        let runtime: Arc<dyn Runtime> = Arc::new(mux_runtime::LocalRuntime::new(
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            LocalMode::InPlace,
        ));
        let output_dir = dir.path().join("bg-out");
        let opts = SpawnOptions::new("echo hello-from-bg; exit 3", dir.path().to_path_buf(), output_dir.clone());

        let handle = spawn(runtime, opts).await.unwrap();
        assert!(handle.pid > 0);

        // Poll briefly for the background process to finish and the exit
        // code file to land — this runs a real subprocess so some
        // scheduling latency is expected.
        let mut state = handle.get_exit_code().await.unwrap();
        for _ in 0..50 {
            if !matches!(state, crate::handle::ExitState::Running) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            state = handle.get_exit_code().await.unwrap();
        }
        assert_eq!(state, crate::handle::ExitState::Exited(3));

        let (output, offset) = handle.read_output(0).await.unwrap();
        assert!(String::from_utf8_lossy(&output).contains("hello-from-bg"));
        assert!(offset > 0);
    }
}
