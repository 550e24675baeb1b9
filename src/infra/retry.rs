use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_UPDATE_ATTEMPTS: u32 = 2;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

pub type RetryPredicate = Arc<dyn Fn(&AppError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
    pub should_retry: RetryPredicate,
}

impl RetryPolicy {
    /// Policy for writes: fewer attempts, and a rejected or missing resource
    /// is never replayed.
    pub fn for_update() -> Self {
        Self {
            max_attempts: DEFAULT_UPDATE_ATTEMPTS,
            should_retry: Arc::new(|err| {
                !matches!(err.status(), Some(400) | Some(404)) && is_transient(err)
            }),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    pub fn with_predicate(
        mut self,
        should_retry: impl Fn(&AppError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_multiplier)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            should_retry: Arc::new(is_transient),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

/// Rate limits, server errors and transport failures are worth another try.
/// Authentication failures and other client errors are not.
pub fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::Network { .. } => true,
        AppError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !(policy.should_retry)(&err) {
                    return Err(err);
                }

                let wait = match &err {
                    AppError::Api {
                        retry_after: Some(hint),
                        ..
                    } => (*hint).min(policy.max_delay),
                    _ => delay,
                };
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    error = %err,
                    "request failed, retrying"
                );
                tokio::time::sleep(wait).await;

                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(policy: RetryPolicy) -> RetryPolicy {
        policy.with_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    fn server_error(attempt: u32) -> AppError {
        AppError::Api {
            status: 503,
            message: format!("attempt {attempt}"),
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let calls = AtomicU32::new(0);
        let policy = fast(RetryPolicy::default().with_max_attempts(4)).with_predicate(|_| true);

        let result: AppResult<()> = execute(&policy, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(server_error(attempt)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("attempt 4"));
    }

    #[tokio::test]
    async fn stops_immediately_when_predicate_refuses() {
        let calls = AtomicU32::new(0);
        let policy = fast(RetryPolicy::default()).with_predicate(|_| false);

        let result: AppResult<()> = execute(&policy, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(server_error(attempt)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = fast(RetryPolicy::default());

        let result = execute(&policy, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Err(AppError::Network {
                        message: "reset".to_string(),
                        timed_out: false,
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn authentication_is_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast(RetryPolicy::default());

        let result: AppResult<()> = execute(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::Authentication {
                    status: 401,
                    message: "bad key".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_predicate_classification() {
        let api = |status| AppError::Api {
            status,
            message: String::new(),
            retry_after: None,
        };
        assert!(is_transient(&api(429)));
        assert!(is_transient(&api(500)));
        assert!(is_transient(&api(502)));
        assert!(!is_transient(&api(400)));
        assert!(!is_transient(&api(404)));
        assert!(is_transient(&AppError::Network {
            message: "timed out".to_string(),
            timed_out: true,
        }));
        assert!(!is_transient(&AppError::Validation("x".to_string())));
    }

    #[test]
    fn update_policy_is_stricter() {
        let policy = RetryPolicy::for_update();
        assert_eq!(policy.max_attempts, 2);
        let not_found = AppError::Api {
            status: 404,
            message: String::new(),
            retry_after: None,
        };
        assert!(!(policy.should_retry)(&not_found));
        let unavailable = AppError::Api {
            status: 503,
            message: String::new(),
            retry_after: None,
        };
        assert!((policy.should_retry)(&unavailable));
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        let mut delay = policy.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(delay.as_millis());
            delay = policy.next_delay(delay);
        }
        assert_eq!(seen, vec![1000, 2000, 4000, 8000, 10_000]);
    }
}
