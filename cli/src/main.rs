//! Entry point for `mux`, the thin CLI that exercises `WorkspaceService`
//! and `AgentSession` end to end. No RPC server, no provider SDK, no PTY —
//! just enough to create a workspace and send it a message from a
//! terminal, the way `codex-cli` sits atop `codex-core`.

mod stub_ai;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mux_core::{CreateWorkspaceRequest, WorkspaceService};
use mux_protocol::{Part, WorkspaceConfig};
use mux_session::StreamRequestOptions;
use tracing_subscriber::EnvFilter;

use stub_ai::EchoAiServiceFactory;

/// mux: workspace runtime and agent-session substrate for an AI coding agent.
#[derive(Debug, Parser)]
#[clap(author, name = "mux", version)]
struct Cli {
    /// Override `~/.mux` (same precedence as `$MUX_HOME`).
    #[arg(long, global = true)]
    mux_home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new in-place workspace (the project directory itself, no
    /// worktree or copy) and print its assigned id.
    Create {
        /// Absolute path to the project directory.
        project_path: String,
        /// Human-readable project name stored alongside the workspace.
        #[arg(long, default_value = "project")]
        project_name: String,
    },
    /// List every known workspace.
    List,
    /// Delete a workspace by id.
    Remove {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Send one message to a workspace's agent session and print the reply.
    Chat {
        id: String,
        message: String,
    },
    /// Run a command as a detached background process inside a workspace,
    /// waiting for it to exit and printing its output.
    Run {
        id: String,
        script: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let mux_home = match cli.mux_home {
        Some(path) => path,
        None => mux_core::find_mux_home()?,
    };

    let service = WorkspaceService::load(mux_home, Arc::new(EchoAiServiceFactory), None).await?;

    match cli.command {
        Command::Create { project_path, project_name } => create(&service, project_path, project_name).await,
        Command::List => list(&service).await,
        Command::Remove { id, force } => remove(&service, &id, force).await,
        Command::Chat { id, message } => chat(&service, &id, message).await,
        Command::Run { id, script } => run(&service, &id, script).await,
    }
}

async fn create(service: &WorkspaceService, project_path: String, project_name: String) -> anyhow::Result<()> {
    let metadata = service
        .create(CreateWorkspaceRequest {
            name: project_path.clone(),
            project_path,
            project_name,
            runtime_config: WorkspaceConfig::Local { src_base_dir: String::new() },
            trunk_branch: None,
            ai_settings: None,
        })
        .await?;
    println!("{}", metadata.id);
    Ok(())
}

async fn list(service: &WorkspaceService) -> anyhow::Result<()> {
    for metadata in service.list().await {
        println!("{}\t{}\t{}", metadata.id, metadata.name, metadata.project_path);
    }
    Ok(())
}

async fn remove(service: &WorkspaceService, id: &str, force: bool) -> anyhow::Result<()> {
    service.remove(id, force).await?;
    Ok(())
}

async fn chat(service: &WorkspaceService, id: &str, message: String) -> anyhow::Result<()> {
    let session = service.session_for(id).await?;
    let mut chat_events = session.subscribe_chat().await;

    // The first `MessageAppended` event is the user's own turn; the reply
    // is complete once the assistant's turn is appended.
    let reply_task = tokio::spawn(async move {
        while let Some(event) = chat_events.recv().await {
            match event {
                mux_session::ChatEvent::StreamDelta { text } => {
                    print!("{text}");
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                }
                mux_session::ChatEvent::MessageAppended(message) if message.role == mux_protocol::Role::Assistant => {
                    break;
                }
                _ => {}
            }
        }
    });

    session
        .send_message(message, Vec::<Part>::new(), None, StreamRequestOptions::default(), None)
        .await
        .map_err(anyhow::Error::from)?;
    reply_task.await.ok();
    println!();
    Ok(())
}

async fn run(service: &WorkspaceService, id: &str, script: String) -> anyhow::Result<()> {
    let handle = service.spawn_background(id, script).await?;
    loop {
        if !handle.is_alive().await? {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let (output, _) = handle.read_output(0).await?;
    std::io::Write::write_all(&mut std::io::stdout(), &output)?;
    println!("exit: {:?}", handle.get_exit_code().await?);
    Ok(())
}
