//! Bounded retry with backoff for a single async operation.
//!
//! The loop is an explicit attempt counter. Waiting goes through a
//! [`Sleeper`] so tests can record delays instead of sleeping.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::warn;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial * factor^(n-2)` before attempt `n`.
    Exponential { factor: f64 },
    /// `initial * (n-1)` before attempt `n`.
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff: Backoff::Exponential { factor: 2.0 },
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before attempt `attempt` (1-based). The first attempt
    /// never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Exponential { factor } => {
                let exponent = (attempt - 2).min(i32::MAX as u32) as i32;
                let secs = self.initial_delay.as_secs_f64() * factor.powi(exponent);
                // Clamped before conversion: Duration panics on overflow or NaN.
                if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
                    Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
                } else {
                    self.max_delay
                }
            }
            Backoff::Linear => self.initial_delay.saturating_mul(attempt - 1).min(self.max_delay),
        }
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// A successful result plus how many retries it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is used up. `on_retry(attempt, &error)` fires after
    /// a failed attempt and before the wait that precedes the next one.
    pub async fn run<T, Op, Fut, R>(&self, mut operation: Op, mut on_retry: R) -> Result<Retried<T>, IngestError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
        R: FnMut(u32, &IngestError),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        retries: attempt - 1,
                    })
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(IngestError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    })
                }
                Err(err) => {
                    on_retry(attempt, &err);
                    let delay = self.policy.delay_before(attempt + 1);
                    warn!(
                        "[RETRY] attempt {}/{} failed ({}), waiting {}ms",
                        attempt,
                        max_attempts,
                        err,
                        delay.as_millis()
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.delays.lock().unwrap().push(duration);
            futures_util::future::ready(()).boxed()
        }
    }

    fn coordinator(policy: RetryPolicy) -> (RetryCoordinator, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        (RetryCoordinator::with_sleeper(policy, sleeper.clone()), sleeper)
    }

    #[test]
    fn exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(4000));
    }

    #[test]
    fn oversized_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_before(80), Duration::from_secs(30));

        let steep = RetryPolicy {
            backoff: Backoff::Exponential { factor: 1e10 },
            ..RetryPolicy::default()
        };
        assert_eq!(steep.delay_before(5), Duration::from_secs(30));

        let infinite = RetryPolicy {
            backoff: Backoff::Exponential { factor: f64::INFINITY },
            ..RetryPolicy::default()
        };
        assert_eq!(infinite.delay_before(3), Duration::from_secs(30));
    }

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy {
            backoff: Backoff::Linear,
            initial_delay: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(2000));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(3000),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_before(10), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let (retry, sleeper) = coordinator(RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let mut notices = Vec::new();

        let result = retry
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(IngestError::Connection("reset".into()))
                        } else {
                            Ok("batch-1")
                        }
                    }
                },
                |attempt, _err| notices.push(attempt),
            )
            .await
            .unwrap();

        assert_eq!(result.value, "batch-1");
        assert_eq!(result.retries, 2);
        assert_eq!(notices, vec![1, 2]);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_immediately() {
        let (retry, sleeper) = coordinator(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<Retried<()>, _> = retry
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(IngestError::Http {
                            status: 422,
                            message: "bad payload".into(),
                        })
                    }
                },
                |_, _| panic!("on_retry must not fire"),
            )
            .await;

        assert!(matches!(result, Err(IngestError::Http { status: 422, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let (retry, sleeper) = coordinator(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<Retried<()>, _> = retry
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(IngestError::Timeout) }
                },
                |_, _| {},
            )
            .await;

        match result {
            Err(IngestError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, IngestError::Timeout));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }
}
