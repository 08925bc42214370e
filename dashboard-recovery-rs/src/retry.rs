//! # Retry Mechanism
//!
//! Retry with exponential backoff for async operations. Attempts run strictly
//! one after another; the backoff before attempt `n + 1` is
//! `retry_delay * 2^(n - 1)`.
//!
//! There is no cancellation token: dropping the returned future cancels any
//! pending backoff sleep.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::settings::RetrySettings;
use crate::error_metrics::metrics_enabled;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Called with the failed attempt's error and its number (from 1)
pub type ErrorCallback<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;
/// Called with the attempt number that finally succeeded
pub type RecoveryCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Options for [`retry_with_backoff`]
pub struct RetryOptions<E> {
    /// Name used in logs and metric labels
    pub name: String,
    /// Total attempts, including the first one. Values below 1 are treated as 1.
    pub max_retries: u32,
    /// Base delay for the exponential backoff
    pub retry_delay: Duration,
    pub on_error: Option<ErrorCallback<E>>,
    pub on_recovery: Option<RecoveryCallback>,
}

impl<E> RetryOptions<E> {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E, u32) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_recovery<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_recovery = Some(Arc::new(callback));
        self
    }

    /// Applies configured defaults for attempts and delay
    pub fn with_settings(mut self, settings: &RetrySettings) -> Self {
        self.max_retries = settings.max_retries;
        self.retry_delay = Duration::from_millis(settings.retry_delay_ms);
        self
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            name: "operation".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_error: None,
            on_recovery: None,
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            on_error: self.on_error.clone(),
            on_recovery: self.on_recovery.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_error", &self.on_error.is_some())
            .field("on_recovery", &self.on_recovery.is_some())
            .finish()
    }
}

/// Delay to wait after the `attempt`-th failure: `base * 2^(attempt - 1)`.
///
/// An `attempt` of zero yields half the base delay, which is what a controller
/// retrying without any recorded failure waits.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    match attempt {
        0 => base / 2,
        n => base.saturating_mul(2u32.saturating_pow(n - 1)),
    }
}

/// Runs `operation` until it succeeds or `max_retries` attempts have failed.
///
/// The final attempt's error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, options: RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.attempts();
    let mut attempt = 1;

    loop {
        if metrics_enabled() {
            ::metrics::counter!("dashboard.retry.attempts", 1, "operation" => options.name.clone());
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = %options.name,
                        attempt = attempt,
                        "Operation recovered after retries"
                    );
                    if metrics_enabled() {
                        ::metrics::counter!("dashboard.retry.recovered", 1, "operation" => options.name.clone());
                    }
                    if let Some(on_recovery) = &options.on_recovery {
                        on_recovery(attempt);
                    }
                }
                return Ok(value);
            }
            Err(error) => {
                if let Some(on_error) = &options.on_error {
                    on_error(&error, attempt);
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = %options.name,
                        attempts = attempt,
                        error = %error,
                        "Giving up after retries"
                    );
                    if metrics_enabled() {
                        ::metrics::counter!("dashboard.retry.exhausted", 1, "operation" => options.name.clone());
                    }
                    return Err(error);
                }

                let delay = backoff_delay(options.retry_delay, attempt);
                debug!(
                    operation = %options.name,
                    attempt = attempt,
                    max_retries = max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after error"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(10);

        assert_eq!(backoff_delay(base, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(40));
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let recovered = Arc::new(AtomicU32::new(0));
        let seen = recovered.clone();
        let options = RetryOptions::<Error>::new("first").on_recovery(move |n| {
            seen.store(n, Ordering::SeqCst);
        });

        let result = retry_with_backoff(|| async { Ok::<_, Error>(42) }, options).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(recovered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let recovered_at = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let seen = recovered_at.clone();
        let seen_errors = errors.clone();
        let options = RetryOptions::new("flaky")
            .retry_delay(Duration::from_millis(100))
            .on_error(move |e: &Error, n| seen_errors.lock().unwrap().push((e.message.clone(), n)))
            .on_recovery(move |n| seen.store(n, Ordering::SeqCst));

        let calls = counter.clone();
        let result = retry_with_backoff(
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::new("network glitch"))
                    } else {
                        Ok("news")
                    }
                }
            },
            options,
        )
        .await;

        assert_eq!(result.unwrap(), "news");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(recovered_at.load(Ordering::SeqCst), 3);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![("network glitch".to_string(), 1), ("network glitch".to_string(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_between_attempts() {
        let started = Instant::now();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let recorded = stamps.clone();
        let result: Result<(), Error> = retry_with_backoff(
            move || {
                recorded.lock().unwrap().push(started.elapsed());
                async { Err(Error::new("boom")) }
            },
            RetryOptions::new("timed")
                .max_retries(4)
                .retry_delay(Duration::from_millis(250)),
        )
        .await;

        assert!(result.is_err());
        let stamps = stamps.lock().unwrap();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let original = Error::named("TypeError", "cannot read property");
        let original_id = original.id;
        let counter = Arc::new(AtomicU32::new(0));

        let calls = counter.clone();
        let template = original.clone();
        let result: Result<(), Error> = retry_with_backoff(
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = template.clone();
                async move { Err(err) }
            },
            RetryOptions::default(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.id, original_id);
        assert_eq!(err.message, "cannot read property");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_max_retries_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result: Result<(), Error> = retry_with_backoff(
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::new("boom")) }
            },
            RetryOptions::default().max_retries(0),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
