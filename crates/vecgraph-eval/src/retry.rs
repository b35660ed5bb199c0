//! Call deadlines, retry with exponential backoff, and cooperative
//! cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use vecgraph_backends::{BackendAdapter, BackendError};
use vecgraph_core::config::BenchmarkConfig;

use crate::state::Operation;

/// Future returned by one adapter call, borrowing the adapter for `'a`.
pub type AdapterCall<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// How adapter calls are bounded and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single adapter call.
    pub call_timeout: Duration,
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&BenchmarkConfig> for RetryPolicy {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.call_timeout_secs.max(1)),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// No retries, short deadline. Used by interactive callers.
    pub fn single_attempt(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay to wait before retrying `error`, or `None` when the error is
    /// final (not retryable or retries exhausted).
    pub fn next_delay(&self, error: &BackendError, attempt: u32) -> Option<Duration> {
        if error.is_retryable() && attempt < self.max_retries {
            Some(self.backoff(attempt))
        } else {
            None
        }
    }

    /// Run `call` under the call deadline. An elapsed deadline becomes
    /// [`BackendError::Timeout`].
    pub async fn bounded<T, F>(&self, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(format!(
                "no response within {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Run `call` against `adapter` until it succeeds or fails for good.
    ///
    /// Every attempt is [`bounded`](Self::bounded) and `input` is lent to
    /// each one. Transient errors sleep out the backoff and try again; the
    /// final error is returned as is.
    pub async fn retry<I, T, F>(
        &self,
        operation: Operation,
        adapter: &mut dyn BackendAdapter,
        input: &I,
        mut call: F,
    ) -> Result<T, BackendError>
    where
        I: ?Sized + Sync,
        F: for<'a> FnMut(&'a mut dyn BackendAdapter, &'a I) -> AdapterCall<'a, T>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(call(&mut *adapter, input)).await {
                Ok(value) => return Ok(value),
                Err(error) => match self.next_delay(&error, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        warn!(
                            backend = %adapter.name(),
                            %operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Transient backend error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }
}

/// Shared flag checked between chunks and between queries.
///
/// Cancelling never interrupts an adapter call in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(50),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(400));
        assert_eq!(p.backoff(3), Duration::from_millis(500));
        assert_eq!(p.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_next_delay_only_for_transient_errors() {
        let p = policy();
        let timeout = BackendError::Timeout("slow".into());
        assert_eq!(p.next_delay(&timeout, 0), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(&timeout, 3), None);
        assert_eq!(p.next_delay(&BackendError::SchemaConflict("dim".into()), 0), None);
        assert_eq!(p.next_delay(&BackendError::Config("auth".into()), 0), None);
        assert!(p.next_delay(&BackendError::Connection("reset".into()), 2).is_some());
    }

    #[test]
    fn test_from_config() {
        let config = BenchmarkConfig::default();
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.call_timeout, Duration::from_secs(60));
        assert_eq!(p.initial_backoff, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let p = policy();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, BackendError>(1)
        };
        assert!(matches!(p.bounded(slow).await, Err(BackendError::Timeout(_))));
        assert_eq!(p.bounded(async { Ok::<_, BackendError>(2) }).await.unwrap(), 2);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
