//! Runtime abstraction over local, SSH, and container workspace backends
//! (spec.md §4.1). Every variant implements the same [`Runtime`] trait so
//! `mux-core`'s `WorkspaceService` can hold `Arc<dyn Runtime>` without
//! knowing which backend it's talking to.

pub mod atomic_write;
pub mod container;
pub mod exec;
pub mod init_logger;
pub mod local;
pub mod ssh;
pub mod trait_def;

pub use container::ContainerRuntime;
pub use exec::{ExecOptions, ExecStream, Stat};
pub use init_logger::{CollectingInitLogger, InitLogger, NullInitLogger};
pub use local::{LocalMode, LocalRuntime};
pub use ssh::{ManagedRemoteSetup, SshRuntime};
pub use trait_def::{CreateWorkspaceOptions, DeleteWorkspaceOptions, ForkWorkspaceOptions, Runtime};
