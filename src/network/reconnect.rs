//! Reconnection policy
//!
//! Bounded retry with a fixed delay between attempts. Once the attempts are
//! exhausted the policy stays in a terminal state until it is reset
//! explicitly, so a dead device is reported instead of retried forever.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default number of attempts per reconnection run
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between two attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors returned by [`ReconnectPolicy::run`]
#[derive(Error, Debug)]
pub enum ReconnectError<E> {
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("Device unavailable: retries exhausted, reconnect explicitly")]
    Unavailable,
}

/// Milestones reported while running the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    Attempting { attempt: u32, max_attempts: u32 },
    Failed { attempt: u32, max_attempts: u32, reason: String },
    Retrying { delay: Duration },
    Connected { attempt: u32 },
    GaveUp { attempts: u32 },
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempting { attempt, max_attempts } => {
                write!(f, "Connecting (attempt {}/{})", attempt, max_attempts)
            }
            RetryEvent::Failed { attempt, max_attempts, reason } => write!(
                f,
                "Failed to connect (attempt {}/{}): {}",
                attempt, max_attempts, reason
            ),
            RetryEvent::Retrying { delay } => {
                write!(f, "Retrying connection in {} seconds...", delay.as_secs_f32())
            }
            RetryEvent::Connected { attempt } => {
                write!(f, "Connected on attempt {}", attempt)
            }
            RetryEvent::GaveUp { attempts } => write!(
                f,
                "Max reconnection attempts ({}) reached. Check the device connection.",
                attempts
            ),
        }
    }
}

/// Bounded retry around a connect operation
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    retry_delay: Duration,
    attempts: u32,
    exhausted: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl ReconnectPolicy {
    /// `max_attempts` is clamped to at least one
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            attempts: 0,
            exhausted: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Failed attempts since the last success or reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the policy has given up
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Leave the terminal state; the next run starts from scratch
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Run `connect` until it succeeds or the attempts are used up.
    ///
    /// `observer` receives every milestone so callers can surface them as
    /// log lines.
    pub async fn run<T, E, F, Fut, O>(
        &mut self,
        mut connect: F,
        mut observer: O,
    ) -> Result<T, ReconnectError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        O: FnMut(&RetryEvent),
    {
        if self.exhausted {
            return Err(ReconnectError::Unavailable);
        }

        let mut emit = |event: RetryEvent| {
            match &event {
                RetryEvent::Failed { .. } | RetryEvent::GaveUp { .. } => {
                    tracing::warn!("{}", event)
                }
                _ => tracing::info!("{}", event),
            }
            observer(&event);
        };

        loop {
            let attempt = self.attempts + 1;
            emit(RetryEvent::Attempting {
                attempt,
                max_attempts: self.max_attempts,
            });

            match connect().await {
                Ok(value) => {
                    self.attempts = 0;
                    emit(RetryEvent::Connected { attempt });
                    return Ok(value);
                }
                Err(e) => {
                    self.attempts = attempt;
                    emit(RetryEvent::Failed {
                        attempt,
                        max_attempts: self.max_attempts,
                        reason: e.to_string(),
                    });

                    if attempt >= self.max_attempts {
                        self.exhausted = true;
                        emit(RetryEvent::GaveUp { attempts: attempt });
                        return Err(ReconnectError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    emit(RetryEvent::Retrying {
                        delay: self.retry_delay,
                    });
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let mut policy = ReconnectPolicy::default();
        let mut calls = 0u32;
        let mut call_times = Vec::new();
        let mut events = Vec::new();
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run(
                || {
                    calls += 1;
                    call_times.push(start.elapsed());
                    async { Err::<(), _>("handshake rejected") }
                },
                |event| events.push(event.clone()),
            )
            .await;

        assert!(matches!(
            result,
            Err(ReconnectError::Exhausted { attempts: 3, last: "handshake rejected" })
        ));
        assert_eq!(calls, 3);
        assert_eq!(call_times.len(), 3);
        for pair in call_times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(5), "gap too short: {:?}", gap);
            assert!(gap < Duration::from_secs(6), "gap too long: {:?}", gap);
        }
        assert!(policy.is_exhausted());

        let retries = events
            .iter()
            .filter(|e| matches!(e, RetryEvent::Retrying { .. }))
            .count();
        assert_eq!(retries, 2);
        assert_eq!(events.last(), Some(&RetryEvent::GaveUp { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_unavailable_until_reset() {
        let mut policy = ReconnectPolicy::new(2, Duration::from_secs(1));
        let mut calls = 0u32;

        let _ = policy
            .run(
                || {
                    calls += 1;
                    async { Err::<(), _>("refused") }
                },
                |_| {},
            )
            .await;
        assert_eq!(calls, 2);

        let again = policy
            .run(
                || {
                    calls += 1;
                    async { Ok::<_, &str>(()) }
                },
                |_| {},
            )
            .await;
        assert!(matches!(again, Err(ReconnectError::Unavailable)));
        assert_eq!(calls, 2);

        policy.reset();
        let after_reset = policy
            .run(
                || {
                    calls += 1;
                    async { Ok::<_, &str>(()) }
                },
                |_| {},
            )
            .await;
        assert!(after_reset.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let mut policy = ReconnectPolicy::default();
        let mut calls = 0u32;
        let mut events = Vec::new();

        let value = policy
            .run(
                || {
                    calls += 1;
                    let ok = calls == 2;
                    async move { if ok { Ok(42) } else { Err("timeout") } }
                },
                |event| events.push(event.clone()),
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(policy.attempts(), 0);
        assert!(!policy.is_exhausted());
        assert!(events.contains(&RetryEvent::Connected { attempt: 2 }));
    }

    #[test]
    fn test_event_lines() {
        let failed = RetryEvent::Failed {
            attempt: 1,
            max_attempts: 3,
            reason: "refused".to_string(),
        };
        assert_eq!(failed.to_string(), "Failed to connect (attempt 1/3): refused");
        assert_eq!(
            RetryEvent::Retrying {
                delay: Duration::from_secs(5)
            }
            .to_string(),
            "Retrying connection in 5 seconds..."
        );
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(ReconnectPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
