use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff with Jitter
// ============================================================================
//
// Bounded retry loop for operations that may fail while a dependency is
// starting up (the broker in particular). Each delay is the previous one
// times `multiplier`, capped at `max_delay`, then spread by +/- `jitter`.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Fraction of the delay used as random spread, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Un-jittered delay that follows the given failed attempt (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay with random spread applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all attempts
    Failed(E),
    /// Shutdown was requested while waiting for the next attempt
    Cancelled,
}

/// Execute an operation with exponential backoff, giving up early on shutdown.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        tracing::debug!(
            attempt = attempt,
            max_attempts = max_attempts,
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed(error);
                }

                let delay = config.jittered_delay(attempt);
                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying after delay"
                );

                if *shutdown.borrow() {
                    return RetryResult::Cancelled;
                }

                tokio::select! {
                    _ = sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Shutdown requested, abandoning retries");
                            return RetryResult::Cancelled;
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
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (_tx, mut shutdown) = watch::channel(false);

        let result = retry_with_backoff(&fast_config(3), &mut shutdown, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("temporary failure")
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success("success")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (_tx, mut shutdown) = watch::channel(false);

        let result = retry_with_backoff(&fast_config(2), &mut shutdown, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("persistent failure")
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed("persistent failure")));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_on_shutdown() {
        let (tx, mut shutdown) = watch::channel(false);
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            ..fast_config(5)
        };

        let result = retry_with_backoff(&config, &mut shutdown, |attempt| {
            if attempt == 1 {
                tx.send(true).unwrap();
            }
            async { Err::<(), _>("broker down") }
        })
        .await;

        assert!(matches!(result, RetryResult::Cancelled));
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let config = fast_config(10);
        assert_eq!(config.base_delay(1), Duration::from_millis(10));
        assert_eq!(config.base_delay(2), Duration::from_millis(20));
        assert_eq!(config.base_delay(3), Duration::from_millis(40));
        assert_eq!(config.base_delay(8), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig {
            jitter: 0.5,
            ..fast_config(10)
        };

        for _ in 0..100 {
            let delay = config.jittered_delay(2);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(30));
        }
    }
}
