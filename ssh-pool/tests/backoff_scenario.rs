//! End-to-end SSH pool backoff scenario: a first probe fails with
//! "connection refused", an immediate second attempt is rejected with the
//! remaining backoff window, and after the window elapses a retry succeeds
//! and resets `consecutiveFailures` to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mux_ssh::{ConnectionPool, PoolError, SshProber, Target};
use pretty_assertions::assert_eq;

struct FlakyOnceProber {
    calls: AtomicUsize,
}

#[async_trait]
impl SshProber for FlakyOnceProber {
    async fn probe(&self, _target: &Target) -> Result<(), String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Err("ssh: connect to host host-a port 22: Connection refused".to_string())
        } else {
            Ok(())
        }
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_then_recovery_resets_failure_count() {
    let prober = Arc::new(FlakyOnceProber {
        calls: AtomicUsize::new(0),
    });
    let pool = ConnectionPool::new(prober);
    let target = Target {
        local_user: "alice".to_string(),
        host: "host-a".to_string(),
        port: 22,
        identity_file: None,
    };

    let first = pool.acquire_connection(&target).await;
    assert!(first.is_err());

    let second = pool.acquire_connection(&target).await;
    match second {
        Err(PoolError::InBackoff(secs)) => assert_eq!(secs, 1),
        other => panic!("expected in-backoff rejection, got {other:?}"),
    }
    assert_eq!(pool.consecutive_failures(&target).await, 1);

    tokio::time::advance(std::time::Duration::from_millis(1100)).await;

    pool.acquire_connection(&target).await.unwrap();
    assert_eq!(pool.consecutive_failures(&target).await, 0);
}
