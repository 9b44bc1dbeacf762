//! Ties the runtime abstraction, background-process manager, agent
//! session, SSH pool, and federation proxy together behind one id-keyed
//! `WorkspaceService` (spec.md §2 "Data flow"). Grounded on
//! `codex-rs/core/src/session_manager.rs`'s arena-and-id shape: an owning
//! manager maps id → state, so sessions/runtimes reference each other
//! only by id, never by pointer, and have clean, cycle-free lifetimes.

pub mod mux_home;
pub mod workspace_service;
pub mod workspace_store;

pub use mux_background::{BackgroundHandle, ExitState};
pub use mux_home::{find_mux_home, workspace_metadata_path, workspaces_dir};
pub use workspace_service::{AiServiceFactory, CreateWorkspaceRequest, SshDependencies, WorkspaceService};
