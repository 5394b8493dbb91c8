//! Bounded retry with exponential backoff for embedding calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trove_llm::EmbedError;

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Worth another try after a backoff.
    Retryable(EmbedError),
    /// Retrying cannot help.
    Fatal(EmbedError),
}

impl<T> From<Result<T, EmbedError>> for Attempt<T> {
    fn from(result: Result<T, EmbedError>) -> Self {
        match result {
            Ok(value) => Self::Done(value),
            Err(e) if e.is_transient() => Self::Retryable(e),
            Err(e) => Self::Fatal(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1`. A provider hint wins over the
    /// computed backoff; both are capped at `max_backoff`.
    #[must_use]
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_backoff);
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Final result of [`run`] plus the number of attempts made.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, EmbedError>,
    pub attempts: u32,
    /// The provider rejected the call outright; exhausted retries are not fatal.
    pub fatal: bool,
}

/// Run `op` until it is done, fatal, or out of retries. A cancelled token
/// interrupts the backoff wait and returns the last error.
pub async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt + 1,
                    fatal: false,
                };
            }
            Attempt::Fatal(e) => {
                tracing::error!(%label, attempt, "embedding failed: {e}");
                return Retried {
                    result: Err(e),
                    attempts: attempt + 1,
                    fatal: true,
                };
            }
            Attempt::Retryable(e) => {
                if attempt >= policy.max_retries {
                    tracing::warn!(%label, attempts = attempt + 1, "retries exhausted: {e}");
                    return Retried {
                        result: Err(e),
                        attempts: attempt + 1,
                        fatal: false,
                    };
                }
                let delay = policy.delay(attempt, e.retry_after());
                tracing::warn!(
                    %label,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient embedding failure, retrying: {e}"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Retried {
                            result: Err(e),
                            attempts: attempt + 1,
                            fatal: false,
                        };
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(p.delay(0, None), Duration::from_millis(100));
        assert_eq!(p.delay(1, None), Duration::from_millis(200));
        assert_eq!(p.delay(2, None), Duration::from_millis(400));
        assert_eq!(p.delay(3, None), Duration::from_millis(500));
        assert_eq!(p.delay(40, None), Duration::from_millis(500));
    }

    #[test]
    fn retry_after_hint_wins() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.delay(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let p = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        };
        assert_eq!(
            p.delay(0, Some(Duration::from_secs(3600))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn attempt_from_result() {
        assert!(matches!(Attempt::from(Ok::<_, EmbedError>(1)), Attempt::Done(1)));
        assert!(matches!(
            Attempt::<()>::from(Err(EmbedError::transient("x"))),
            Attempt::Retryable(_)
        ));
        assert!(matches!(
            Attempt::<()>::from(Err(EmbedError::Authentication("x".into()))),
            Attempt::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let out = run(&fast(), &CancellationToken::new(), "t", move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Attempt::Retryable(EmbedError::transient("busy"))
            } else {
                Attempt::Done(7)
            }
        })
        .await;
        assert_eq!(out.result.unwrap(), 7);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let out = run(&fast(), &CancellationToken::new(), "t", |_| async {
            Attempt::<()>::Retryable(EmbedError::transient("down"))
        })
        .await;
        assert!(out.result.is_err());
        assert!(!out.fatal);
        assert_eq!(out.attempts, 4);
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let out = run(&fast(), &CancellationToken::new(), "t", |_| async {
            Attempt::<()>::Fatal(EmbedError::InvalidInput("bad".into()))
        })
        .await;
        assert!(out.fatal);
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            run(&policy, &cancel, "t", |_| async {
                Attempt::<()>::Retryable(EmbedError::transient("busy"))
            }),
        )
        .await
        .unwrap();
        assert_eq!(out.attempts, 1);
        assert!(out.result.is_err());
    }
}
