use std::time::{Duration, Instant};

/// Backoff schedule indexed by `min(consecutive_failures - 1, len - 1)`
/// (spec.md §4.2).
const BACKOFF_SCHEDULE_SECS: [u64; 6] = [1, 5, 10, 20, 40, 60];

/// Window within which a `healthy` status is trusted without re-probing
/// (spec.md §4.2 step 2).
pub const HEALTHY_TTL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub status: Status,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub last_error: Option<String>,
    pub backoff_until: Option<Instant>,
    pub consecutive_failures: u32,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            last_success: None,
            last_failure: None,
            last_error: None,
            backoff_until: None,
            consecutive_failures: 0,
        }
    }
}

impl ConnectionHealth {
    pub fn mark_healthy(&mut self, now: Instant) {
        self.status = Status::Healthy;
        self.last_success = Some(now);
        self.last_error = None;
        self.consecutive_failures = 0;
        self.backoff_until = None;
    }

    /// Record a failure and advance `backoffUntil` per the schedule.
    /// `backoff_until` is monotonically non-decreasing across consecutive
    /// failures until the schedule caps (spec.md §8).
    pub fn report_failure(&mut self, now: Instant, error: String) {
        self.status = Status::Unhealthy;
        self.last_failure = Some(now);
        self.last_error = Some(error);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let idx = (self.consecutive_failures as usize - 1).min(BACKOFF_SCHEDULE_SECS.len() - 1);
        let backoff = Duration::from_secs(BACKOFF_SCHEDULE_SECS[idx]);
        self.backoff_until = Some(now + backoff);
    }

    pub fn reset_backoff(&mut self) {
        self.consecutive_failures = 0;
        self.backoff_until = None;
    }

    pub fn is_fresh_healthy(&self, now: Instant) -> bool {
        matches!(self.status, Status::Healthy)
            && self
                .last_success
                .is_some_and(|t| now.saturating_duration_since(t) < HEALTHY_TTL)
    }

    pub fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|&until| until > now)
            .map(|until| until - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_is_monotonically_non_decreasing_until_cap() {
        let mut h = ConnectionHealth::default();
        let base = Instant::now();
        let mut prev = Duration::ZERO;
        for _ in 0..8 {
            h.report_failure(base, "boom".to_string());
            let remaining = h.backoff_remaining(base).unwrap();
            assert!(remaining >= prev, "backoff should never shrink");
            prev = remaining;
        }
        // Capped at 60s.
        assert_eq!(prev, Duration::from_secs(60));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut h = ConnectionHealth::default();
        let base = Instant::now();
        h.report_failure(base, "x".to_string());
        h.report_failure(base, "x".to_string());
        assert_eq!(h.consecutive_failures, 2);
        h.mark_healthy(base);
        assert_eq!(h.consecutive_failures, 0);
        assert!(h.backoff_until.is_none());
    }

    #[test]
    fn is_fresh_healthy_within_ttl_only() {
        let mut h = ConnectionHealth::default();
        let t0 = Instant::now();
        h.mark_healthy(t0);
        assert!(h.is_fresh_healthy(t0 + Duration::from_secs(5)));
        assert!(!h.is_fresh_healthy(t0 + Duration::from_secs(16)));
    }
}
