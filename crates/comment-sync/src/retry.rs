//! # Resilient Operation Executor
//!
//! Wraps a single remote call with retry, backoff, and error classification.
//!
//! Two independently configured policies exist:
//!
//! - **posting**: fixed schedule of 1s, 2s, 4s; three retries; no jitter;
//!   retries only throttling errors.
//! - **retraction**: exponential from 2s doubling up to 32s, plus uniform
//!   jitter in `[0, delay/2)`; three retries; also retries transport errors.
//!
//! A server-supplied retry hint is logged with each backoff but never
//! replaces the policy's delay.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Delay shape between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Explicit schedule; the last entry repeats if retries outrun it
    Fixed(Vec<Duration>),
    Exponential {
        base: Duration,
        multiplier: u32,
        cap: Duration,
        jitter: bool,
    },
}

/// Named retry strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub name: &'static str,
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Whether transport failures are retried even without a throttling signal
    pub retry_transport: bool,
}

impl RetryPolicy {
    /// Policy for create/update/delete during the post flow.
    pub fn posting() -> Self {
        Self {
            name: "posting",
            max_retries: 3,
            backoff: Backoff::Fixed(vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]),
            retry_transport: false,
        }
    }

    /// Policy for deletes during the clear flow.
    pub fn retraction() -> Self {
        Self {
            name: "retraction",
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(2),
                multiplier: 2,
                cap: Duration::from_secs(32),
                jitter: true,
            },
            retry_transport: true,
        }
    }

    /// Delay before retry number `retry` (zero-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(schedule) => schedule
                .get(retry as usize)
                .or_else(|| schedule.last())
                .copied()
                .unwrap_or_default(),
            Backoff::Exponential {
                base,
                multiplier,
                cap,
                ..
            } => {
                let factor = multiplier.saturating_pow(retry);
                base.saturating_mul(factor).min(*cap)
            }
        }
    }

    /// Delay before retry number `retry`, jitter included.
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        match &self.backoff {
            Backoff::Exponential { jitter: true, .. } => delay + jitter_below(delay / 2),
            _ => delay,
        }
    }

    pub fn should_retry(&self, err: &SyncError) -> bool {
        if matches!(err, SyncError::Cancelled) {
            return false;
        }
        err.is_rate_limited() || (self.retry_transport && err.is_transport())
    }
}

fn jitter_below(bound: Duration) -> Duration {
    let bound_ms = bound.as_millis() as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..bound_ms))
}

/// Result of running one operation through the executor.
#[derive(Debug)]
pub struct Execution<T> {
    /// Total calls made, first attempt included
    pub attempts: u32,
    pub result: Result<T>,
}

impl<T> Execution<T> {
    /// Retries beyond the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Runs remote operations under a retry policy and a shared cancellation signal.
#[derive(Debug, Clone)]
pub struct Executor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `operation` until it succeeds, fails terminally, or is cancelled.
    ///
    /// Non-retryable errors are returned as-is after the first attempt.
    /// Exhausting the policy yields [`SyncError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Execution<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Execution {
                    attempts,
                    result: Err(SyncError::Cancelled),
                };
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(SyncError::Cancelled),
                result = operation() => result,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation = label, attempts, "Operation succeeded after retry");
                    }
                    return Execution {
                        attempts,
                        result: Ok(value),
                    };
                }
                Err(err) => err,
            };

            if !self.policy.should_retry(&err) {
                return Execution {
                    attempts,
                    result: Err(err),
                };
            }

            let retry = attempts - 1;
            if retry >= self.policy.max_retries {
                warn!(
                    operation = label,
                    policy = self.policy.name,
                    attempts,
                    error = %err,
                    "Retries exhausted"
                );
                return Execution {
                    attempts,
                    result: Err(SyncError::RetriesExhausted {
                        attempts,
                        source: Box::new(err),
                    }),
                };
            }

            let delay = self.policy.delay(retry);
            warn!(
                operation = label,
                policy = self.policy.name,
                attempt = attempts,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                server_hint_ms = err.retry_after().map(|hint| hint.as_millis() as u64),
                error = %err,
                "Retryable failure, backing off"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Execution {
                        attempts,
                        result: Err(SyncError::Cancelled),
                    };
                }
                () = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rate_limited() -> SyncError {
        SyncError::RateLimited {
            message: "API rate limit exceeded".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_posting_schedule() {
        let policy = RetryPolicy::posting();
        let delays: Vec<_> = (0..4).map(|i| policy.delay(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn test_retraction_backoff_bounds() {
        let policy = RetryPolicy::retraction();
        assert_eq!(policy.base_delay(0), Duration::from_secs(2));
        assert_eq!(policy.base_delay(1), Duration::from_secs(4));
        assert_eq!(policy.base_delay(3), Duration::from_secs(16));
        assert_eq!(policy.base_delay(4), Duration::from_secs(32));
        assert_eq!(policy.base_delay(10), Duration::from_secs(32));

        for retry in 0..6 {
            let base = policy.base_delay(retry);
            for _ in 0..50 {
                let delay = policy.delay(retry);
                assert!(delay >= base);
                assert!(delay < base + base / 2);
            }
        }
    }

    #[test]
    fn test_transport_retry_differs_between_policies() {
        let err = SyncError::Transport("connection reset".to_string());
        assert!(!RetryPolicy::posting().should_retry(&err));
        assert!(RetryPolicy::retraction().should_retry(&err));

        let throttled = SyncError::Transport("secondary rate limit".to_string());
        assert!(RetryPolicy::posting().should_retry(&throttled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_under_posting_policy() {
        let executor = Executor::new(RetryPolicy::posting(), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&calls);
        let execution = executor
            .execute("create", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(rate_limited())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(execution.attempts, 4);
        assert_eq!(execution.retries(), 3);
        let err = execution.result.unwrap_err();
        assert_eq!(err.attempts(), Some(4));
        assert!(err.is_rate_limited());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let executor = Executor::new(RetryPolicy::posting(), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let execution = executor
            .execute("update", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(SyncError::Api {
                        status: 422,
                        message: "line must be part of the diff".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(execution.attempts, 1);
        assert!(matches!(execution.result, Err(SyncError::Api { status: 422, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_throttle() {
        let executor = Executor::new(RetryPolicy::retraction(), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let execution = executor
            .execute("delete", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SyncError::Transport("dns failure".to_string()))
                    } else {
                        Ok(7_u64)
                    }
                }
            })
            .await;

        assert_eq!(execution.attempts, 3);
        assert_eq!(execution.result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_hint_does_not_stretch_fixed_schedule() {
        let executor = Executor::new(RetryPolicy::posting(), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&calls);
        let execution = executor
            .execute("create", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(SyncError::RateLimited {
                            message: "secondary rate limit".to_string(),
                            retry_after: Some(Duration::from_secs(60)),
                        })
                    } else {
                        Ok(1_u64)
                    }
                }
            })
            .await;

        assert_eq!(execution.attempts, 2);
        assert_eq!(execution.result.unwrap(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let executor = Executor::new(RetryPolicy::posting(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let execution = executor
            .execute("create", || async { Err::<(), _>(rate_limited()) })
            .await;

        assert_eq!(execution.attempts, 2);
        assert!(matches!(execution.result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = Executor::new(RetryPolicy::retraction(), cancel);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let execution = executor
            .execute("delete", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(execution.attempts, 0);
        assert!(matches!(execution.result, Err(SyncError::Cancelled)));
    }
}
