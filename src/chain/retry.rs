//! Bounded retry loop over typed call outcomes.
//!
//! Network failures and 5xx back off exponentially (`base * 2^(n-1)`, capped,
//! plus jitter) up to `max_attempts`. A 429 waits at least `Retry-After`,
//! capped at `rate_limit_cap`, pushes the shared admission gate forward by the
//! same amount, and counts against a separate consecutive limit.

use super::clock::Clock;
use super::gate::AdmissionGate;
use crate::config::ClientConfig;
use crate::error::{Result, WalletError};
use crate::runtime::{cancellable, Shutdown};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What one attempt produced.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// Worth another attempt (transport failure, 5xx).
    Retryable(WalletError),
    /// HTTP 429, with the server's `Retry-After` when given.
    RateLimited(Option<Duration>),
    Fatal(WalletError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_rate_limited: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub rate_limit_cap: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            max_rate_limited: config.max_rate_limited,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            // 429 waits are never longer than the generic cap
            rate_limit_cap: config.rate_limit_cap.min(config.backoff_cap),
            jitter_max: config.jitter_max,
        }
    }

    /// `base * 2^(attempt-1)`, capped. `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }

    /// Delay after the `consecutive`-th 429 in a row.
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>, consecutive: u32) -> Duration {
        let floor = retry_after.unwrap_or(Duration::ZERO);
        floor.max(self.backoff(consecutive)).min(self.rate_limit_cap)
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Everything an attempt loop needs besides the operation itself.
pub struct RetryContext<'a> {
    pub policy: &'a RetryPolicy,
    pub clock: &'a dyn Clock,
    pub gate: &'a AdmissionGate,
    pub shutdown: Option<&'a Shutdown>,
    /// Per-address gate key, if any.
    pub key: Option<&'a str>,
}

impl RetryContext<'_> {
    async fn pause(&self, delay: Duration) -> Result<()> {
        cancellable(self.shutdown, async {
            self.clock.sleep(delay).await;
            Ok(())
        })
        .await
    }

    /// Run `attempt` until it succeeds, fails fatally, or a cap is hit.
    /// Every attempt first takes a slot from the admission gate.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let mut failures = 0u32;
        let mut rate_limited = 0u32;

        loop {
            cancellable(self.shutdown, async {
                self.gate.acquire(self.key).await;
                Ok(())
            })
            .await?;

            let outcome = cancellable(self.shutdown, async { Ok(attempt().await) }).await?;
            match outcome {
                Outcome::Success(value) => return Ok(value),
                Outcome::Fatal(err) => {
                    debug!(call = label, error = %err, "fatal response, not retrying");
                    return Err(err);
                }
                Outcome::Retryable(err) => {
                    rate_limited = 0;
                    failures += 1;
                    if failures >= self.policy.max_attempts {
                        warn!(call = label, attempts = failures, error = %err, "giving up");
                        return Err(err);
                    }
                    let delay = self.policy.backoff(failures) + self.policy.jitter();
                    debug!(call = label, attempt = failures, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    self.pause(delay).await?;
                }
                Outcome::RateLimited(retry_after) => {
                    rate_limited += 1;
                    if rate_limited > self.policy.max_rate_limited {
                        warn!(call = label, consecutive = rate_limited, "rate limit retries exhausted");
                        return Err(WalletError::RateLimited {
                            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
                        });
                    }
                    let penalty = self.policy.rate_limit_delay(retry_after, rate_limited);
                    warn!(call = label, consecutive = rate_limited, penalty_ms = penalty.as_millis() as u64, "rate limited");
                    self.gate.penalize(penalty).await;
                    self.pause(self.policy.jitter()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&ClientConfig::default().without_jitter())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(1000));
        assert_eq!(p.backoff(2), Duration::from_millis(2000));
        assert_eq!(p.backoff(3), Duration::from_millis(4000));
        assert_eq!(p.backoff(5), Duration::from_millis(8000));
        assert_eq!(p.backoff(60), Duration::from_millis(8000));
    }

    #[test]
    fn test_rate_limit_delay_floor_and_cap() {
        let p = policy();
        assert_eq!(p.rate_limit_delay(Some(Duration::from_secs(3)), 1), Duration::from_secs(3));
        assert_eq!(p.rate_limit_delay(None, 2), Duration::from_secs(2));
        assert_eq!(p.rate_limit_delay(Some(Duration::from_secs(120)), 1), Duration::from_secs(5));
    }

    #[test]
    fn test_rate_limit_cap_tighter_than_backoff_cap() {
        let p = policy();
        assert!(p.rate_limit_cap < p.backoff_cap);
        for consecutive in 1..=10 {
            for retry_after in [None, Some(Duration::from_secs(2)), Some(Duration::from_secs(3600))] {
                assert!(p.rate_limit_delay(retry_after, consecutive) <= p.backoff_cap);
            }
        }

        // A looser configured cap is clamped
        let mut config = ClientConfig::default();
        config.rate_limit_cap = Duration::from_secs(60);
        let loose = RetryPolicy::from_config(&config);
        assert_eq!(loose.rate_limit_delay(Some(Duration::from_secs(3600)), 1), loose.backoff_cap);
    }

    #[test]
    fn test_jitter_bounded() {
        let p = RetryPolicy::from_config(&ClientConfig::default());
        for _ in 0..100 {
            assert!(p.jitter() <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn test_retryable_gives_up_after_max_attempts() {
        let clock = Arc::new(ManualClock::new());
        let gate = AdmissionGate::new(clock.clone(), Duration::ZERO);
        let p = policy();
        let ctx = RetryContext { policy: &p, clock: clock.as_ref(), gate: &gate, shutdown: None, key: None };
        let calls = AtomicU32::new(0);

        let result: Result<()> = ctx
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Outcome::Retryable(WalletError::network("boom", Some(502)))
            })
            .await;
        assert!(matches!(result, Err(WalletError::Network { status: Some(502), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1000), Duration::from_millis(2000)]);
    }

    #[tokio::test]
    async fn test_rate_limited_cap_is_separate() {
        let clock = Arc::new(ManualClock::new());
        let gate = AdmissionGate::new(clock.clone(), Duration::ZERO);
        let p = policy();
        let ctx = RetryContext { policy: &p, clock: clock.as_ref(), gate: &gate, shutdown: None, key: None };
        let calls = AtomicU32::new(0);

        let result: Result<()> = ctx
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Outcome::RateLimited(Some(Duration::from_secs(1)))
            })
            .await;
        assert!(matches!(result, Err(WalletError::RateLimited { retry_after_ms: Some(1000) })));
        // Five retries after the first 429
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let clock = Arc::new(ManualClock::new());
        let gate = AdmissionGate::new(clock.clone(), Duration::ZERO);
        let p = policy();
        let ctx = RetryContext { policy: &p, clock: clock.as_ref(), gate: &gate, shutdown: None, key: None };
        let calls = AtomicU32::new(0);
        let result: Result<()> = ctx
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Outcome::Fatal(WalletError::network("bad request", Some(400)))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_attempt() {
        let clock = Arc::new(ManualClock::new());
        let gate = AdmissionGate::new(clock.clone(), Duration::ZERO);
        let p = policy();
        let shutdown = Shutdown::new();
        shutdown.trigger().await;
        let ctx = RetryContext { policy: &p, clock: clock.as_ref(), gate: &gate, shutdown: Some(&shutdown), key: None };
        let result: Result<u8> = ctx.run("test", || async { Outcome::Success(1) }).await;
        assert!(matches!(result, Err(WalletError::Cancelled)));
    }
}
