//! Retry policy and a generic async retry combinator.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::SampleError;
use crate::settings::DeviceClass;

/// Errors that know whether another attempt is worthwhile.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SampleError {
    fn is_retryable(&self) -> bool {
        SampleError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each subsequent one.
    pub base_delay: Duration,
    /// Extra wait before an attempt when the source stalled since the last one.
    pub stall_recovery: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_device(DeviceClass::Standard)
    }
}

impl RetryPolicy {
    pub fn for_device(device: DeviceClass) -> Self {
        match device {
            DeviceClass::Standard => Self {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                stall_recovery: Duration::from_secs(1),
            },
            DeviceClass::Constrained => Self {
                max_attempts: 5,
                base_delay: Duration::from_millis(1000),
                stall_recovery: Duration::from_secs(2),
            },
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            stall_recovery: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Why [`retry`] gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// A non-retryable error ended the loop early.
    Aborted { attempts: u32, error: E },
    /// Every attempt failed; `last` is the final error.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy runs out.
///
/// `op` receives the 1-based attempt number. Waits between attempts are
/// `tokio::time::sleep` calls, so they yield to the scheduler.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => {
                return Err(RetryError::Aborted { attempts: attempt, error });
            }
            Err(last) if attempt >= max => {
                return Err(RetryError::Exhausted { attempts: attempt, last });
            }
            Err(error) => {
                let delay = policy.delay_after(attempt);
                debug!(attempt, max, ?delay, %error, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_doubles() {
        let p = RetryPolicy::for_device(DeviceClass::Standard);
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(2), Duration::from_millis(1000));
        assert_eq!(p.delay_after(3), Duration::from_millis(2000));

        let p = RetryPolicy::for_device(DeviceClass::Constrained);
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.delay_after(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry(&RetryPolicy::default(), |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(SampleError::Decode("flaky".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_with_last_error() {
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = retry(&RetryPolicy::default(), |attempt| async move {
            Err(SampleError::Decode(format!("attempt {}", attempt)))
        })
        .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: SampleError::Decode("attempt 3".into())
            })
        );
        // 500ms + 1000ms between three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1510));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborts_on_fatal_error() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(&RetryPolicy::for_device(DeviceClass::Constrained), |_| {
            calls.set(calls.get() + 1);
            async { Err(SampleError::SourceLost("closed".into())) }
        })
        .await;
        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(RetryError::Aborted { attempts: 1, .. })));
    }
}
