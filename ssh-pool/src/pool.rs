use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::health::{ConnectionHealth, Status};

/// `(local-user, host, port, identityFile)` — the pool key. `srcBaseDir` is
/// intentionally not part of this type so transport is shared across every
/// workspace on the same host (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub local_user: String,
    pub host: String,
    pub port: u16,
    pub identity_file: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Message format is load-bearing: the retry helper parses
    /// `"in backoff for <N>s"` back out of it (spec.md §4.2/§8).
    #[error("in backoff for {0}s")]
    InBackoff(u64),

    #[error("ssh probe failed: {0}")]
    ProbeFailed(String),
}

/// Abstraction over the actual `ssh ... echo ok` probe so the pool's
/// scheduling logic (backoff, singleflight, TTL) can be tested without
/// shelling out. Production code supplies a real prober that runs `ssh`
/// with `ControlMaster=auto`, the deterministic `ControlPath`, and
/// `ControlPersist=60` (spec.md §4.1/§4.2).
#[async_trait]
pub trait SshProber: Send + Sync {
    async fn probe(&self, target: &Target) -> Result<(), String>;
}

type InflightMap = HashMap<Target, watch::Receiver<Option<Result<(), String>>>>;

struct Inner {
    health: HashMap<Target, ConnectionHealth>,
    inflight: InflightMap,
}

/// Per-target SSH connection health tracker with deterministic backoff and
/// single-flight probing (spec.md §4.2).
pub struct ConnectionPool {
    inner: Mutex<Inner>,
    prober: Arc<dyn SshProber>,
}

enum Decision {
    AlreadyHealthy,
    InBackoff(u64),
    JoinInflight(watch::Receiver<Option<Result<(), String>>>),
    StartProbeWithSender(watch::Sender<Option<Result<(), String>>>),
}

impl ConnectionPool {
    pub fn new(prober: Arc<dyn SshProber>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                health: HashMap::new(),
                inflight: HashMap::new(),
            }),
            prober,
        }
    }

    /// Implements the acquire policy from spec.md §4.2 atomically: backoff
    /// check, fresh-healthy short-circuit, singleflight join, or start a new
    /// probe. At most one probe runs per target at a time regardless of how
    /// many callers race in concurrently (spec.md §8).
    pub async fn acquire_connection(&self, target: &Target) -> Result<(), PoolError> {
        let decision = {
            let mut guard = self.inner.lock().await;
            let now = Instant::now();
            let health = guard.health.entry(target.clone()).or_default();

            if let Some(remaining) = health.backoff_remaining(now) {
                Decision::InBackoff(remaining.as_secs().max(1))
            } else if health.is_fresh_healthy(now) {
                Decision::AlreadyHealthy
            } else if let Some(rx) = guard.inflight.get(target) {
                Decision::JoinInflight(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                guard.inflight.insert(target.clone(), rx);
                Decision::StartProbeWithSender(tx)
            }
        };

        match decision {
            Decision::AlreadyHealthy => Ok(()),
            Decision::InBackoff(secs) => Err(PoolError::InBackoff(secs)),
            Decision::JoinInflight(mut rx) => {
                // Singleflight: await the in-flight probe's result instead
                // of starting our own.
                loop {
                    if let Some(result) = rx.borrow().clone() {
                        return result.map_err(PoolError::ProbeFailed);
                    }
                    if rx.changed().await.is_err() {
                        // Sender dropped without ever sending: treat as a
                        // probe failure and let the caller retry.
                        return Err(PoolError::ProbeFailed(
                            "probe task ended without a result".to_string(),
                        ));
                    }
                }
            }
            Decision::StartProbeWithSender(tx) => self.run_probe(target, tx).await,
        }
    }

    async fn run_probe(
        &self,
        target: &Target,
        tx: watch::Sender<Option<Result<(), String>>>,
    ) -> Result<(), PoolError> {
        let result = self.prober.probe(target).await;
        let now = Instant::now();
        {
            let mut guard = self.inner.lock().await;
            let health = guard.health.entry(target.clone()).or_default();
            match &result {
                Ok(()) => health.mark_healthy(now),
                Err(e) => health.report_failure(now, e.clone()),
            }
            guard.inflight.remove(target);
        }
        // Best-effort: tell anyone who joined us. Ignore send errors (no
        // receivers left is fine).
        let _ = tx.send(Some(result.clone()));
        result.map_err(PoolError::ProbeFailed)
    }

    pub async fn mark_healthy(&self, target: &Target) {
        let mut guard = self.inner.lock().await;
        guard.health.entry(target.clone()).or_default().mark_healthy(Instant::now());
    }

    pub async fn report_failure(&self, target: &Target, error: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard
            .health
            .entry(target.clone())
            .or_default()
            .report_failure(Instant::now(), error.into());
    }

    pub async fn reset_backoff(&self, target: &Target) {
        let mut guard = self.inner.lock().await;
        guard.health.entry(target.clone()).or_default().reset_backoff();
    }

    pub async fn status(&self, target: &Target) -> Status {
        let guard = self.inner.lock().await;
        guard.health.get(target).map(|h| h.status).unwrap_or(Status::Unknown)
    }

    pub async fn consecutive_failures(&self, target: &Target) -> u32 {
        let guard = self.inner.lock().await;
        guard
            .health
            .get(target)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    fn target() -> Target {
        Target {
            local_user: "alice".to_string(),
            host: "example.com".to_string(),
            port: 22,
            identity_file: None,
        }
    }

    struct FailNProber {
        remaining_failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SshProber for FailNProber {
        async fn probe(&self, _target: &Target) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prev = self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { Some(0) }
            }).unwrap();
            if prev > 0 {
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn backoff_error_message_is_parseable() {
        let prober = Arc::new(FailNProber {
            remaining_failures: AtomicUsize::new(100),
            calls: AtomicUsize::new(0),
        });
        let pool = ConnectionPool::new(prober);
        let t = target();

        let err = pool.acquire_connection(&t).await.unwrap_err();
        assert!(matches!(err, PoolError::ProbeFailed(_)));

        let err2 = pool.acquire_connection(&t).await.unwrap_err();
        match err2 {
            PoolError::InBackoff(secs) => assert_eq!(secs, 1),
            other => panic!("expected InBackoff, got {other:?}"),
        }
        assert_eq!(pool.consecutive_failures(&t).await, 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_singleflight_to_one_probe() {
        let prober = Arc::new(FailNProber {
            remaining_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let pool = Arc::new(ConnectionPool::new(prober.clone()));
        let t = target();
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let t = t.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                pool.acquire_connection(&t).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_backoff_clears_failures() {
        let prober = Arc::new(FailNProber {
            remaining_failures: AtomicUsize::new(100),
            calls: AtomicUsize::new(0),
        });
        let pool = ConnectionPool::new(prober);
        let t = target();
        let _ = pool.acquire_connection(&t).await;
        assert_eq!(pool.consecutive_failures(&t).await, 1);
        pool.reset_backoff(&t).await;
        assert_eq!(pool.consecutive_failures(&t).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_within_ttl_short_circuits_without_probing() {
        let prober = Arc::new(FailNProber {
            remaining_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let pool = ConnectionPool::new(prober.clone());
        let t = target();
        pool.acquire_connection(&t).await.unwrap();
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        pool.acquire_connection(&t).await.unwrap();
        assert_eq!(
            prober.calls.load(Ordering::SeqCst),
            1,
            "should not re-probe within healthy TTL"
        );
    }
}
