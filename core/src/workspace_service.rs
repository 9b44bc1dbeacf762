//! Arena-and-id workspace manager (spec.md §2/§9 "Arena-and-id for
//! sessions"): picks a [`Runtime`] per workspace config, lazily creates one
//! [`AgentSession`] per workspace id, persists [`WorkspaceMetadata`]
//! durably, and short-circuits to [`FederationProxy`] for remote ids.
//! Grounded on `codex-rs/core/src/session_manager.rs`'s id → state map and
//! `mcp_connection_manager.rs`'s "one entry per configured backend, built
//! lazily" shape.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mux_protocol::{
    expand_tilde, is_valid_workspace_name, AiSettings, MuxError, Result, WorkspaceConfig, WorkspaceMetadata,
};
use mux_background::{BackgroundHandle, SpawnOptions};
use mux_runtime::{
    ContainerRuntime, CreateWorkspaceOptions, DeleteWorkspaceOptions, ForkWorkspaceOptions, LocalMode, LocalRuntime,
    ManagedRemoteSetup, Runtime, SshRuntime,
};
use mux_session::AgentSession;
use mux_ssh::ConnectionPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::mux_home::workspace_history_path;
use crate::workspace_store;

/// Builds the per-workspace [`mux_session::AiService`] a new `AgentSession`
/// should drive. Kept as a factory rather than one shared instance because
/// a production `AiService` is typically scoped to a workspace's runtime
/// (tool execution needs a cwd) even though the trait signature itself
/// doesn't carry one.
pub trait AiServiceFactory: Send + Sync {
    fn build(&self, metadata: &WorkspaceMetadata) -> Arc<dyn mux_session::AiService>;
}

/// Everything a `create` call needs beyond what the caller's environment
/// already provides. `name` must satisfy spec.md §3's identity invariant;
/// an in-place workspace is requested by setting `name == project_path`.
#[derive(Debug, Clone)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub project_path: String,
    pub project_name: String,
    pub runtime_config: WorkspaceConfig,
    pub trunk_branch: Option<String>,
    pub ai_settings: Option<AiSettings>,
}

struct Registry {
    /// `id` → metadata, the durable half mirrored in memory for fast
    /// `(project_path, name)` uniqueness checks (spec.md §3).
    by_id: HashMap<String, WorkspaceMetadata>,
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    sessions: HashMap<String, Arc<AgentSession>>,
}

/// External dependencies an SSH-backed workspace may need that this crate
/// doesn't implement itself (spec.md §1's "managed remote workspace"
/// control service is an external collaborator). `control_plane` is shared
/// across every managed-remote workspace; each workspace's own
/// `ManagedRemoteConfig` comes from its `WorkspaceConfig::Ssh.coder` field.
pub struct SshDependencies {
    pub pool: Arc<ConnectionPool>,
    pub control_plane: Option<Arc<dyn mux_runtime::ssh::ManagedRemoteControlPlane>>,
}

/// Ties runtimes, agent sessions, background processes, and federation
/// together behind one id-keyed surface. One instance per running mux
/// process.
pub struct WorkspaceService {
    mux_home: PathBuf,
    ai_factory: Arc<dyn AiServiceFactory>,
    ssh: Option<SshDependencies>,
    registry: Mutex<Registry>,
}

impl WorkspaceService {
    /// Loads every persisted workspace's metadata from `mux_home` into the
    /// in-memory index. `ssh` is `None` for deployments that never talk to
    /// an SSH-backed workspace (no pool to share).
    pub async fn load(mux_home: PathBuf, ai_factory: Arc<dyn AiServiceFactory>, ssh: Option<SshDependencies>) -> Result<Self> {
        let persisted = workspace_store::load_all(&mux_home).await?;
        let by_id = persisted.into_iter().map(|m| (m.id.clone(), m)).collect();
        Ok(Self {
            mux_home,
            ai_factory,
            ssh,
            registry: Mutex::new(Registry { by_id, runtimes: HashMap::new(), sessions: HashMap::new() }),
        })
    }

    pub fn mux_home(&self) -> &Path {
        &self.mux_home
    }

    pub async fn get(&self, id: &str) -> Result<WorkspaceMetadata> {
        self.registry
            .lock()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| MuxError::WorkspaceNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<WorkspaceMetadata> {
        self.registry.lock().await.by_id.values().cloned().collect()
    }

    /// Creates a new workspace: validates the name, enforces
    /// `(project_path, name)` uniqueness, builds the right runtime,
    /// delegates the fast-path provisioning to it, then persists the
    /// resulting metadata (spec.md §3/§4.1).
    pub async fn create(&self, req: CreateWorkspaceRequest) -> Result<WorkspaceMetadata> {
        let in_place = req.name == req.project_path;
        if !in_place && !is_valid_workspace_name(&req.name) {
            return Err(MuxError::RuntimeStartFailed(format!(
                "workspace name {:?} does not match ^[a-z0-9][a-z0-9_-]{{0,62}}$",
                req.name
            )));
        }

        {
            let registry = self.registry.lock().await;
            if registry
                .by_id
                .values()
                .any(|m| m.project_path == req.project_path && m.name == req.name)
            {
                return Err(MuxError::RuntimeStartFailed(format!(
                    "a workspace named {:?} already exists for project {:?}",
                    req.name, req.project_path
                )));
            }
        }

        let runtime = self.build_runtime(&req.runtime_config)?;
        runtime
            .create_workspace(CreateWorkspaceOptions {
                project_path: PathBuf::from(&req.project_path),
                workspace_name: req.name.clone(),
                trunk_branch: req.trunk_branch.clone(),
            })
            .await?;

        let metadata = WorkspaceMetadata {
            id: format!("ws-{}", Uuid::new_v4()),
            name: req.name,
            project_name: req.project_name,
            project_path: req.project_path,
            runtime_config: req.runtime_config,
            ai_settings: req.ai_settings,
        };
        workspace_store::save(&self.mux_home, &metadata).await?;

        let mut registry = self.registry.lock().await;
        registry.runtimes.insert(metadata.id.clone(), runtime);
        registry.by_id.insert(metadata.id.clone(), metadata.clone());
        Ok(metadata)
    }

    /// Deletes a workspace: the runtime's own delete (which MUST NOT
    /// self-escalate past `force`), then the persisted record and every
    /// in-memory cache entry, in that order — metadata survives disk if
    /// the runtime delete fails, since it may be retried (spec.md §4.1/§5).
    pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let metadata = self.get(id).await?;
        let runtime = self.runtime_for(&metadata).await?;
        let path = runtime.workspace_path(Path::new(&metadata.project_path), &metadata.name);
        runtime.delete_workspace(&path, DeleteWorkspaceOptions { force }).await?;

        workspace_store::delete(&self.mux_home, id).await?;
        let mut registry = self.registry.lock().await;
        registry.by_id.remove(id);
        registry.runtimes.remove(id);
        registry.sessions.remove(id);
        Ok(())
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<WorkspaceMetadata> {
        let mut metadata = self.get(id).await?;
        let runtime = self.runtime_for(&metadata).await?;
        let old_path = runtime.workspace_path(Path::new(&metadata.project_path), &metadata.name);
        runtime.rename_workspace(&old_path, new_name).await?;

        metadata.name = new_name.to_string();
        workspace_store::save(&self.mux_home, &metadata).await?;
        self.registry.lock().await.by_id.insert(id.to_string(), metadata.clone());
        Ok(metadata)
    }

    pub async fn fork(&self, id: &str, new_workspace_name: &str) -> Result<PathBuf> {
        let metadata = self.get(id).await?;
        let runtime = self.runtime_for(&metadata).await?;
        runtime
            .fork_workspace(ForkWorkspaceOptions {
                source_workspace_name: metadata.name.clone(),
                new_workspace_name: new_workspace_name.to_string(),
            })
            .await
    }

    /// Spawns a detached background process inside a workspace's runtime
    /// (spec.md §4.3/"Data flow": "background commands are spawned through
    /// the runtime"). The output directory lives under the runtime's own
    /// temp dir, namespaced by workspace id so unrelated workspaces never
    /// collide on one.
    pub async fn spawn_background(&self, id: &str, script: impl Into<String>) -> Result<BackgroundHandle> {
        let metadata = self.get(id).await?;
        let runtime = self.runtime_for(&metadata).await?;
        let workspace_path = runtime.workspace_path(Path::new(&metadata.project_path), &metadata.name);
        let output_dir = runtime.temp_dir().join("mux-background").join(id).join(Uuid::new_v4().to_string());
        let opts = SpawnOptions::new(script, workspace_path, output_dir);
        mux_background::spawn(runtime, opts).await
    }

    /// The runtime for a workspace, built lazily and cached for the life
    /// of this service (spec.md §9 "Arena-and-id").
    pub async fn runtime_for(&self, metadata: &WorkspaceMetadata) -> Result<Arc<dyn Runtime>> {
        if let Some(existing) = self.registry.lock().await.runtimes.get(&metadata.id) {
            return Ok(existing.clone());
        }
        let runtime = self.build_runtime(&metadata.runtime_config)?;
        self.registry.lock().await.runtimes.insert(metadata.id.clone(), runtime.clone());
        Ok(runtime)
    }

    /// The lazily-created `AgentSession` for a workspace id (spec.md §4.4
    /// "created lazily per workspace id").
    pub async fn session_for(&self, id: &str) -> Result<Arc<AgentSession>> {
        let metadata = self.get(id).await?;
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.sessions.get(id) {
            return Ok(existing.clone());
        }
        let ai = self.ai_factory.build(&metadata);
        let history_path = workspace_history_path(&self.mux_home, &metadata.id);
        let session = AgentSession::new(ai, history_path);
        registry.sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    fn build_runtime(&self, config: &WorkspaceConfig) -> Result<Arc<dyn Runtime>> {
        match config {
            WorkspaceConfig::Local { src_base_dir } => Ok(Arc::new(LocalRuntime::new(
                expand_tilde(src_base_dir),
                self.mux_home.clone(),
                LocalMode::InPlace,
            ))),
            WorkspaceConfig::Worktree { src_base_dir } => Ok(Arc::new(LocalRuntime::new(
                expand_tilde(src_base_dir),
                self.mux_home.clone(),
                LocalMode::Worktree,
            ))),
            WorkspaceConfig::Ssh { host, src_base_dir, identity_file, port, coder } => {
                let ssh = self
                    .ssh
                    .as_ref()
                    .ok_or_else(|| MuxError::RuntimeStartFailed("this mux has no SSH connection pool configured".to_string()))?;
                let managed_remote = match (coder, &ssh.control_plane) {
                    (Some(cfg), Some(control_plane)) => {
                        Some(ManagedRemoteSetup::new(cfg.clone(), control_plane.clone()))
                    }
                    (Some(_), None) => {
                        return Err(MuxError::RuntimeStartFailed(
                            "workspace requests a managed remote but no control plane is configured".to_string(),
                        ))
                    }
                    (None, _) => None,
                };
                Ok(Arc::new(SshRuntime::new(
                    host.clone(),
                    port.unwrap_or(22),
                    identity_file.clone(),
                    expand_tilde(src_base_dir),
                    self.mux_home.clone(),
                    ssh.pool.clone(),
                    managed_remote,
                )))
            }
            WorkspaceConfig::Container { image, container_name } => Ok(Arc::new(ContainerRuntime::new(
                image.clone(),
                container_name.clone().unwrap_or_else(|| format!("mux-{}", Uuid::new_v4())),
                self.mux_home.clone(),
            ))),
        }
    }
}
