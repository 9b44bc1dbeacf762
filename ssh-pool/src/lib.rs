//! SSH transport health tracking: deterministic multiplex socket naming,
//! per-target backoff, singleflight probing, and a retry helper layered on
//! top. Does not itself open `ssh` subprocesses — production callers supply
//! an [`SshProber`] that does, and a `mux-runtime` SSH `Runtime` wraps a
//! [`ConnectionPool`] to decide when it's safe to reuse a multiplexed
//! connection.

pub mod health;
pub mod pool;
pub mod retry;
pub mod socket;

pub use health::{ConnectionHealth, Status, HEALTHY_TTL};
pub use pool::{ConnectionPool, PoolError, SshProber, Target};
pub use retry::{backoff_seconds_from_message, is_retryable_message, retry_with_backoff};
pub use socket::multiplex_socket_path;
