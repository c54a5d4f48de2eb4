//! Staleness policy for queued orders
//!
//! Elapsed time is always measured with `tokio::time::Instant`, which is
//! monotonic and unaffected by wall-clock adjustment.

use std::time::Duration;
use tokio::time::Instant;

/// Whether `elapsed_ms` exceeds `threshold_ms`. Equal is still fresh.
pub fn is_stale(elapsed_ms: u64, threshold_ms: u64) -> bool {
    elapsed_ms > threshold_ms
}

/// Deadlines applied to a single coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Maximum age of an order when its prerequisites clear
    pub threshold: Duration,
    /// Upper bound on the prerequisite wait itself; `None` waits indefinitely
    pub max_prerequisite_wait: Option<Duration>,
}

impl StalenessPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            max_prerequisite_wait: None,
        }
    }

    pub fn with_max_prerequisite_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_prerequisite_wait = max_wait;
        self
    }

    /// Evaluate against an order started at `created_at`
    pub fn is_stale_since(&self, created_at: Instant) -> bool {
        is_stale(
            created_at.elapsed().as_millis() as u64,
            self.threshold.as_millis() as u64,
        )
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            crate::config::DEFAULT_STALENESS_THRESHOLD_MS,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert!(!is_stale(0, 30_000));
        assert!(!is_stale(30_000, 30_000));
        assert!(is_stale(30_001, 30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_uses_monotonic_elapsed_time() {
        let policy = StalenessPolicy::new(Duration::from_secs(30));
        let created_at = Instant::now();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!policy.is_stale_since(created_at));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(policy.is_stale_since(created_at));
    }
}
