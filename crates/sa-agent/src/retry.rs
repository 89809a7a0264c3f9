//! Exponential backoff with jitter for recoverable operations

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use sa_core::config::BackoffConfig;

/// Retries an operation with exponentially growing pauses
#[derive(Debug, Clone)]
pub struct ExponentialRetryer {
    /// Delay before the first retry
    initial: Duration,
    /// Upper bound on the base delay
    max: Duration,
    /// Growth factor per attempt
    ratio: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Failures tolerated before giving up (0 = retry forever)
    max_attempts: u32,
}

impl ExponentialRetryer {
    /// Create a retryer from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            ratio: config.multiplier,
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }
    }

    /// Create a retryer with custom parameters
    pub fn new(initial: Duration, max: Duration, ratio: f64, jitter: f64, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            ratio,
            jitter,
            max_attempts,
        }
    }

    /// Pause before retry number `attempt`, and whether the cap was reached
    ///
    /// The base delay is `min(initial * ratio^attempt, max)`; jitter adds up
    /// to `base * jitter` on top.
    pub fn next_sleep_time(&self, attempt: u32) -> (Duration, bool) {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_nanos = self.initial.as_nanos() as f64 * self.ratio.powi(exponent);

        let (delay, capped) = if !base_nanos.is_finite() || base_nanos >= self.max.as_nanos() as f64 {
            (self.max, true)
        } else {
            (Duration::from_nanos(base_nanos as u64), false)
        };

        if self.jitter <= 0.0 {
            return (delay, capped);
        }
        let jitter_amount = delay.mul_f64(self.jitter * rand::random::<f64>());
        (delay + jitter_amount, capped)
    }

    /// Run `op` until it succeeds or the attempt budget is spent
    ///
    /// Returns the last error once `max_attempts` calls have failed.
    pub async fn call<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        let mut failed = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            failed = failed.saturating_add(1);
            if self.max_attempts != 0 && failed >= self.max_attempts {
                tracing::warn!("Giving up after {} failed attempts: {}", failed, err);
                return Err(err);
            }

            let (delay, capped) = self.next_sleep_time(attempt);
            if !capped {
                attempt = attempt.saturating_add(1);
            }

            tracing::debug!("Attempt {} failed: {}. Retrying in {:?}", failed, err, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for ExponentialRetryer {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_sleep_time_grows_then_caps() {
        let retryer = ExponentialRetryer::default();

        assert_eq!(retryer.next_sleep_time(0), (Duration::from_millis(100), false));
        assert_eq!(retryer.next_sleep_time(1), (Duration::from_millis(200), false));
        assert_eq!(retryer.next_sleep_time(4), (Duration::from_millis(1600), false));
        assert_eq!(retryer.next_sleep_time(5), (Duration::from_millis(2000), true));
        assert_eq!(retryer.next_sleep_time(60), (Duration::from_millis(2000), true));
    }

    #[test]
    fn test_sleep_time_monotonic_and_bounded_with_jitter() {
        let retryer = ExponentialRetryer::new(
            Duration::from_millis(100),
            Duration::from_millis(2000),
            2.0,
            0.5,
            10,
        );
        let bound = Duration::from_millis(3000);

        let mut previous_base = Duration::ZERO;
        for attempt in 0..20 {
            let (delay, _) = retryer.next_sleep_time(attempt);
            assert!(delay <= bound, "attempt {attempt}: {delay:?}");

            let base = Duration::from_millis(100u64.saturating_mul(1 << attempt.min(20)))
                .min(Duration::from_millis(2000));
            assert!(base >= previous_base);
            assert!(delay >= base);
            previous_base = base;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_succeeds_after_failures() {
        let retryer = ExponentialRetryer::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let start = tokio::time::Instant::now();
        let result: Result<u32, String> = retryer
            .call(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("failure {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_gives_up_after_max_attempts() {
        let retryer = ExponentialRetryer::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = retryer
            .call(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result, Err("failure 10".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        // 100 + 200 + 400 + 800 + 1600, then four sleeps at the 2000 ms cap
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(11_100) && elapsed < Duration::from_millis(11_200));
    }

    #[tokio::test]
    async fn test_call_immediate_success_does_not_sleep() {
        let retryer = ExponentialRetryer::default();
        let result: Result<&str, String> = retryer.call(|| async { Ok("done") }).await;
        assert_eq!(result, Ok("done"));
    }
}
