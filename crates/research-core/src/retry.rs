//! Retry with exponential backoff and a circuit breaker for external calls.

use crate::ResearchError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier,
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Yahoo Finance: 4 attempts, 1s doubling, capped at 10s
    pub fn yahoo() -> Self {
        Self::new(4, Duration::from_secs(1), 2.0).with_max_delay(Duration::from_secs(10))
    }

    /// OpenAI: 5 attempts, 2s doubling, capped at 30s
    pub fn openai() -> Self {
        Self::new(5, Duration::from_secs(2), 2.0).with_max_delay(Duration::from_secs(30))
    }

    /// Local database: 3 attempts, 0.5s growing by 1.5x
    pub fn database() -> Self {
        Self::new(3, Duration::from_millis(500), 1.5).with_max_delay(Duration::from_secs(5))
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
pub async fn retry_async<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ResearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResearchError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!("{} failed after {} attempts: {}", label, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let mut delay = policy.delay_for(attempt);
                if let ResearchError::RateLimited {
                    retry_after_secs: Some(secs),
                    ..
                } = &e
                {
                    delay = delay.max(Duration::from_secs(*secs)).min(policy.max_delay);
                }
                tracing::warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:.1}s",
                    label,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Stops calling a failing service for `recovery_timeout` once
/// `failure_threshold` consecutive failures have been seen.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Err while open; moves to half-open once the recovery timeout passed.
    pub async fn check(&self) -> Result<(), ResearchError> {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.recovery_timeout {
                return Err(ResearchError::CircuitOpen(self.name.clone()));
            }
            tracing::info!("Circuit breaker for {} half-open, probing", self.name);
            inner.state = CircuitState::HalfOpen;
        }
        Ok(())
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            tracing::info!("Circuit breaker for {} closed", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip && inner.state != CircuitState::Open {
            tracing::warn!(
                "Circuit breaker for {} opened after {} failures",
                self.name,
                inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Run `op` behind the breaker. Only service failures count against it.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ResearchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResearchError>>,
    {
        self.check().await?;
        match op().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                if e.is_service_failure() {
                    self.record_failure().await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), 2.0)
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::yahoo();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_async(&fast_policy(4), "flaky", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ResearchError::Timeout("svc".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_async(&fast_policy(5), "lookup", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ResearchError::NotFound("ZZZZZ".into()))
        })
        .await;

        assert!(matches!(result, Err(ResearchError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_async(&fast_policy(3), "down", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ResearchError::upstream("svc", Some(503), "unavailable"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_recovers() {
        let breaker = CircuitBreaker::new("svc", 2, Duration::from_millis(30));

        for _ in 0..2 {
            let r: Result<(), _> = breaker
                .call(|| async { Err(ResearchError::Timeout("svc".into())) })
                .await;
            assert!(r.is_err());
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        let blocked: Result<(), _> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(blocked, Err(ResearchError::CircuitOpen(_))));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let probe = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(probe, Ok(7));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("svc", 1, Duration::from_millis(10));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.check().await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_not_found_does_not_trip_breaker() {
        let breaker = CircuitBreaker::new("svc", 1, Duration::from_secs(60));
        let _: Result<(), _> = breaker
            .call(|| async { Err(ResearchError::NotFound("X".into())) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
