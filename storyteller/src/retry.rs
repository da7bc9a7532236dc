//! Bounded "retry until accepted" loop shared by the generators.
//!
//! Each attempt runs to completion (call, parse, check) before the next one
//! starts. There is no backoff: an optional fixed delay separates attempts.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Limits for [`retry_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }
}

/// Attempt errors decide whether another attempt may follow.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Terminal outcome of a failed retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; `last` is the final attempt's error.
    Exhausted { attempts: u32, last: Option<E> },
    /// An attempt failed with a non-retryable error.
    Aborted { attempt: u32, error: E },
}

/// Run `work` until `check` accepts its output or the attempts run out.
///
/// `work` receives the 1-based attempt number. `check` turns an unacceptable
/// output into an attempt error; both failure kinds count against the limit.
pub fn retry_until<T, E, W, C>(
    policy: &RetryPolicy,
    mut work: W,
    mut check: C,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    W: FnMut(u32) -> Result<T, E>,
    C: FnMut(&T) -> Result<(), E>,
{
    let mut last = None;
    for attempt in 1..=policy.max_attempts {
        if attempt > 1
            && let Some(delay) = policy.delay
        {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
            thread::sleep(delay);
        }

        let outcome = work(attempt).and_then(|value| check(&value).map(|()| value));
        match outcome {
            Ok(value) => {
                debug!(attempt, "attempt accepted");
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                warn!(attempt, err = %error, "attempt aborted");
                return Err(RetryError::Aborted { attempt, error });
            }
            Err(error) => {
                warn!(attempt, max_attempts = policy.max_attempts, err = %error, "attempt failed");
                last = Some(error);
            }
        }
    }
    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Soft(u32),
        Hard,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Soft(_))
        }
    }

    #[test]
    fn returns_first_accepted_value() {
        let mut calls = Vec::new();
        let got = retry_until(
            &RetryPolicy::new(5),
            |attempt| {
                calls.push(attempt);
                Ok::<u32, TestError>(attempt)
            },
            |value| {
                if *value >= 3 {
                    Ok(())
                } else {
                    Err(TestError::Soft(*value))
                }
            },
        );
        assert_eq!(got, Ok(3));
        assert_eq!(calls, vec![1, 2, 3]);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let got: Result<u32, _> = retry_until(
            &RetryPolicy::new(3),
            |attempt| Err(TestError::Soft(attempt)),
            |_| Ok(()),
        );
        assert_eq!(
            got,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: Some(TestError::Soft(3))
            })
        );
    }

    #[test]
    fn aborts_on_non_retryable_error() {
        let mut calls = 0;
        let got: Result<u32, _> = retry_until(
            &RetryPolicy::new(3),
            |_| {
                calls += 1;
                Err(TestError::Hard)
            },
            |_| Ok(()),
        );
        assert_eq!(
            got,
            Err(RetryError::Aborted {
                attempt: 1,
                error: TestError::Hard
            })
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_never_calls_work() {
        let got = retry_until(
            &RetryPolicy::new(0),
            |_| -> Result<u32, TestError> { panic!("not called") },
            |_| Ok(()),
        );
        assert_eq!(
            got,
            Err(RetryError::Exhausted {
                attempts: 0,
                last: None
            })
        );
    }

    #[test]
    fn zero_delay_is_dropped() {
        let policy = RetryPolicy::new(2).with_delay(Duration::ZERO);
        assert_eq!(policy.delay, None);
    }
}
