//! Generic retry helper for SSH-backed operations (spec.md §4.2). Classifies
//! errors as retryable (transient network/connection noise, or a pool
//! backoff window) versus terminal (auth failure, host key mismatch, "no
//! such file"), and backs off exponentially between attempts independent of
//! the pool's own backoff schedule.

use std::time::Duration;

use crate::pool::PoolError;

/// Substrings that mark an error message as transient and worth retrying.
/// Anything not matching one of these (or a pool backoff message) is
/// treated as terminal.
const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "connection reset by peer",
    "connection timed out",
    "broken pipe",
    "could not resolve hostname",
    "no route to host",
    "kex_exchange_identification",
];

const MAX_ATTEMPTS: u32 = 8;
const MAX_TOTAL_RETRY_TIME: Duration = Duration::from_secs(120);
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Returns whether `message` looks like a transient condition worth
/// retrying rather than surfacing immediately.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

/// Parses a pool backoff error's "in backoff for Ns" message back into the
/// number of seconds remaining, so a retry loop can sleep precisely that
/// long instead of guessing.
pub fn backoff_seconds_from_message(message: &str) -> Option<u64> {
    let rest = message.strip_prefix("in backoff for ")?;
    let digits = rest.strip_suffix('s')?;
    digits.parse().ok()
}

fn delay_for_attempt(attempt: u32) -> Duration {
    let secs = BASE_DELAY.as_secs().saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    Duration::from_secs(secs).min(MAX_DELAY)
}

/// Retries `op` up to `MAX_ATTEMPTS` times, or until `MAX_TOTAL_RETRY_TIME`
/// has elapsed, whichever comes first. Stops immediately if `op`'s error is
/// classified as non-retryable, or if `abort` fires. Pool backoff errors are
/// slept out exactly (capped by `MAX_DELAY`) rather than using the generic
/// exponential schedule.
pub async fn retry_with_backoff<F, Fut, T>(
    mut op: F,
    mut abort: tokio::sync::watch::Receiver<bool>,
) -> Result<T, PoolError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PoolError>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if *abort.borrow() {
            return Err(PoolError::ProbeFailed("aborted".to_string()));
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();
                let retryable = match &err {
                    PoolError::InBackoff(_) => true,
                    PoolError::ProbeFailed(_) => is_retryable_message(&message),
                };

                if !retryable || attempt >= MAX_ATTEMPTS || start.elapsed() >= MAX_TOTAL_RETRY_TIME {
                    return Err(err);
                }

                let delay = backoff_seconds_from_message(&message)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| delay_for_attempt(attempt));

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = abort.changed() => {
                        if *abort.borrow() {
                            return Err(PoolError::ProbeFailed("aborted".to_string()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn classifies_known_transient_errors() {
        assert!(is_retryable_message("ssh: connect to host x port 22: Connection refused"));
        assert!(is_retryable_message("Connection timed out"));
        assert!(!is_retryable_message("Permission denied (publickey)"));
        assert!(!is_retryable_message("no such file or directory"));
    }

    #[test]
    fn parses_backoff_seconds() {
        assert_eq!(backoff_seconds_from_message("in backoff for 5s"), Some(5));
        assert_eq!(backoff_seconds_from_message("connection refused"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let calls2 = calls.clone();
        let result = retry_with_backoff(
            move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(PoolError::ProbeFailed("connection refused".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            rx,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_error_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let calls2 = calls.clone();
        let result: Result<(), PoolError> = retry_with_backoff(
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PoolError::ProbeFailed("permission denied (publickey)".to_string()))
                }
            },
            rx,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_signal_stops_retry_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();
        let calls2 = calls.clone();
        let result: Result<(), PoolError> = retry_with_backoff(
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PoolError::ProbeFailed("connection refused".to_string()))
                }
            },
            rx,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
