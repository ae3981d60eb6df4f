//! Sliding-window admission control and the retry/backoff policy shared by
//! both enrichment modes.

use providers::VisionError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Counts requests issued in the last 60 seconds and suspends callers until
/// a slot opens. One instance is shared by every task in an enrichment phase.
pub struct SlidingWindow {
    max_per_minute: usize,
    timestamps: Mutex<Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Wait until a request may be issued, then record it.
    ///
    /// The window keeps moving while we sleep, so admission is re-checked in
    /// a loop rather than assumed after a single wait.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut times = self.timestamps.lock().await;
                let now = Instant::now();
                times.retain(|t| now.duration_since(*t) < WINDOW);

                if times.len() < self.max_per_minute {
                    times.push(now);
                    return;
                }
                match times.first() {
                    Some(oldest) => WINDOW - now.duration_since(*oldest) + Duration::from_secs(1),
                    None => Duration::from_secs(1),
                }
            };
            tracing::info!(wait_secs = wait.as_secs_f64(), "Rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests still inside the lookback window, for status reporting.
    pub async fn requests_in_window(&self) -> usize {
        let mut times = self.timestamps.lock().await;
        let now = Instant::now();
        times.retain(|t| now.duration_since(*t) < WINDOW);
        times.len()
    }
}

/// What the retry loop should do after one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    RetryAfter(Duration),
    /// The error is permanent or non-transient; stop now.
    Stop,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given zero-based attempt, capped.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        self.max_retry_delay.min(Duration::from_secs_f64(exp))
    }

    /// Classify one attempt's error. `attempt` is zero-based; when no
    /// attempts remain the decision is always `Stop`.
    pub fn decide(&self, error: &VisionError, attempt: usize) -> RetryDecision {
        if attempt + 1 >= self.max_retries {
            return RetryDecision::Stop;
        }
        match error {
            VisionError::Auth | VisionError::Config(_) | VisionError::Parse(_) => {
                RetryDecision::Stop
            }
            VisionError::RateLimited {
                retry_after: Some(secs),
            } => RetryDecision::RetryAfter(self.max_retry_delay.min(Duration::from_secs(*secs))),
            // No server hint: fall back to the same schedule as a 5xx.
            VisionError::RateLimited { retry_after: None }
            | VisionError::Server { .. }
            | VisionError::Network(_) => RetryDecision::RetryAfter(self.backoff_delay(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        // Far past the cap.
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(60));

        // Non-decreasing across attempts for a fixed error class.
        let mut prev = Duration::ZERO;
        for attempt in 0..12 {
            let d = policy.backoff_delay(attempt);
            assert!(d >= prev);
            assert!(d <= policy.max_retry_delay);
            prev = d;
        }
    }

    #[test]
    fn permanent_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&VisionError::Auth, 0), RetryDecision::Stop);
        assert_eq!(
            policy.decide(&VisionError::Config("m".into()), 0),
            RetryDecision::Stop
        );
        assert_eq!(
            policy.decide(&VisionError::Parse("bad".into()), 0),
            RetryDecision::Stop
        );
    }

    #[test]
    fn server_hint_bounded_by_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&VisionError::RateLimited { retry_after: Some(5) }, 0),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(
                &VisionError::RateLimited {
                    retry_after: Some(600)
                },
                0
            ),
            RetryDecision::RetryAfter(Duration::from_secs(60))
        );
        // Hint-less 429 behaves like a server error.
        assert_eq!(
            policy.decide(&VisionError::RateLimited { retry_after: None }, 1),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn last_attempt_always_stops() {
        let policy = RetryPolicy::default();
        let transient = VisionError::Server {
            status: 503,
            message: String::new(),
        };
        assert_eq!(policy.decide(&transient, 2), RetryDecision::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_cap() {
        let limiter = Arc::new(SlidingWindow::new(3));

        for _ in 0..3 {
            limiter.admit().await;
        }
        assert_eq!(limiter.requests_in_window().await, 3);

        // Fourth admission must wait for the window to slide past the oldest
        // timestamp; paused time auto-advances through the sleep.
        let start = Instant::now();
        limiter.admit().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(limiter.requests_in_window().await <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_spread_over_windows() {
        let limiter = SlidingWindow::new(2);
        for _ in 0..6 {
            limiter.admit().await;
            assert!(limiter.requests_in_window().await <= 2);
        }
    }
}
