//! File-anchored background process manager (spec.md §4.3). A background
//! process is spawned as a detached process-group leader through whatever
//! [`Runtime`] the caller hands in, and observed afterward purely through
//! its output directory — this crate never holds a live handle to the OS
//! process itself, so local and remote (SSH, container) backends look
//! identical to callers.

pub mod handle;
pub mod spawn;
pub mod wrapper;

pub use handle::{BackgroundHandle, ExitState};
pub use spawn::{spawn, SpawnOptions};
