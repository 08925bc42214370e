//! # Error-Handling Controller
//!
//! Per-component error state for components that catch their own failures
//! instead of relying on a boundary. The controller counts failures, decides
//! whether another retry is allowed, waits out the backoff on a
//! [`CancellableTimer`] and reports everything to [`ErrorMetrics`].
//!
//! Retries never overlap: `retry` is a no-op while another retry is in
//! flight. Resetting or cleaning up cancels the pending backoff, and a retry
//! that completes after such a cancellation leaves the state untouched.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{ready, Ready};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error_metrics::ErrorMetrics;
use crate::retry::{backoff_delay, ErrorCallback, RecoveryCallback, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::settings::RecoveryConfig;
use crate::strategy::{RecoveryStrategy, StrategySelector};
use crate::timer::{CancellableTimer, TimerOutcome};
use crate::types::{Error, Result};

/// Snapshot of a controller's error state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub error: Option<Error>,
    pub retry_count: u32,
    pub can_retry: bool,
    pub is_retrying: bool,
}

impl RetryState {
    pub fn initial() -> Self {
        Self {
            error: None,
            retry_count: 0,
            can_retry: true,
            is_retrying: false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::initial()
    }
}

/// How a call to [`ErrorController::retry`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Retries exhausted, already retrying, or controller cleaned up
    Skipped,
    /// The retry succeeded and the state was reset
    Recovered,
    /// The retry failed again; the failure was recorded
    Failed,
    /// Reset or cleanup happened while the retry was pending
    Cancelled,
}

type NoRetryFn = fn() -> Ready<Result<()>>;

pub struct ErrorController {
    component: String,
    max_retries: u32,
    retry_delay: Duration,
    on_error: Option<ErrorCallback<Error>>,
    on_recovery: Option<RecoveryCallback>,
    metrics: Arc<ErrorMetrics>,
    selector: StrategySelector,
    state: Mutex<RetryState>,
    timer: CancellableTimer,
    disposed: AtomicBool,
}

impl ErrorController {
    pub fn new<S: Into<String>>(component: S) -> Self {
        Self {
            component: component.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_error: None,
            on_recovery: None,
            metrics: ErrorMetrics::global(),
            selector: StrategySelector::default(),
            state: Mutex::new(RetryState::initial()),
            timer: CancellableTimer::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// A controller using the configured retry defaults and critical components
    pub fn from_config<S: Into<String>>(component: S, config: &RecoveryConfig) -> Self {
        Self::new(component)
            .max_retries(config.retry.max_retries)
            .retry_delay(Duration::from_millis(config.retry.retry_delay_ms))
            .with_selector(config.strategy_selector())
    }

    /// At least one attempt is always allowed, as with [`crate::RetryOptions`]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error, u32) + Send + Sync + 'static,
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

    pub fn with_metrics(mut self, metrics: Arc<ErrorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    fn lock(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> RetryState {
        self.lock().clone()
    }

    /// Recommended recovery for the current error, if there is one
    pub fn strategy(&self) -> Option<RecoveryStrategy> {
        let state = self.lock();
        state
            .error
            .as_ref()
            .map(|error| self.selector.select(error, &self.component))
    }

    /// Records a failure and bumps the retry count
    pub fn handle_error(&self, error: Error) {
        self.metrics.record_error(&self.component, &error, false);

        let retry_count = {
            let mut state = self.lock();
            state.retry_count += 1;
            state.can_retry = state.retry_count < self.max_retries;
            state.error = Some(error.clone());
            state.retry_count
        };

        warn!(
            component = %self.component,
            error_id = %error.id,
            error = %error,
            retry_count = retry_count,
            max_retries = self.max_retries,
            "Component error handled"
        );

        if let Some(on_error) = &self.on_error {
            on_error(&error, retry_count);
        }
    }

    /// Runs `operation`, routing a failure through [`Self::handle_error`]
    pub async fn run<T, F, Fut>(&self, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match operation().await {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_error(error);
                None
            }
        }
    }

    /// Waits out the backoff, then treats the wait itself as a recovery
    pub async fn retry(&self) -> RetryOutcome {
        self.run_retry(None::<NoRetryFn>).await
    }

    /// Waits out the backoff, then runs `retry_fn`
    pub async fn retry_with<F, Fut>(&self, retry_fn: F) -> RetryOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.run_retry(Some(retry_fn)).await
    }

    async fn run_retry<F, Fut>(&self, retry_fn: Option<F>) -> RetryOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (previous_error, retry_count, generation) = {
            let mut state = self.lock();
            if self.disposed.load(Ordering::SeqCst) || !state.can_retry || state.is_retrying {
                debug!(
                    component = %self.component,
                    can_retry = state.can_retry,
                    is_retrying = state.is_retrying,
                    "Retry skipped"
                );
                return RetryOutcome::Skipped;
            }
            state.is_retrying = true;
            (state.error.clone(), state.retry_count, self.timer.generation())
        };

        let delay = backoff_delay(self.retry_delay, retry_count);
        debug!(
            component = %self.component,
            retry_count = retry_count,
            backoff_ms = delay.as_millis() as u64,
            "Retrying after backoff"
        );

        if self.timer.wait(delay).await == TimerOutcome::Cancelled || self.is_stale(generation) {
            debug!(component = %self.component, "Pending retry cancelled");
            return RetryOutcome::Cancelled;
        }

        let result = match retry_fn {
            Some(retry_fn) => retry_fn().await,
            None => ready(Ok(())).await,
        };

        if self.is_stale(generation) {
            debug!(component = %self.component, "Discarding retry result after reset");
            return RetryOutcome::Cancelled;
        }

        match result {
            Ok(()) => {
                *self.lock() = RetryState::initial();

                if let Some(error) = &previous_error {
                    self.metrics.record_error(&self.component, error, true);
                }
                info!(
                    component = %self.component,
                    retry_count = retry_count,
                    "Component recovered"
                );
                if let Some(on_recovery) = &self.on_recovery {
                    on_recovery(retry_count);
                }
                RetryOutcome::Recovered
            }
            Err(error) => {
                self.lock().is_retrying = false;
                self.handle_error(error);
                RetryOutcome::Failed
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.timer.generation() != generation
    }

    /// Drops the current error and cancels any pending retry
    pub fn clear_error(&self) {
        let mut state = self.lock();
        *state = RetryState::initial();
        self.timer.cancel();
    }

    pub fn reset(&self) {
        self.clear_error();
    }

    /// Cancels pending work; call when the owning component goes away
    pub fn cleanup(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.timer.cancel();
        debug!(component = %self.component, "Error controller cleaned up");
    }
}

impl fmt::Debug for ErrorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorController")
            .field("component", &self.component)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("state", &self.state())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, Instant};

    fn controller(component: &str) -> (Arc<ErrorMetrics>, ErrorController) {
        let metrics = Arc::new(ErrorMetrics::new());
        let controller = ErrorController::new(component).with_metrics(metrics.clone());
        (metrics, controller)
    }

    #[test]
    fn test_handle_error_updates_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (metrics, controller) = controller("NewsCarousel");
        let controller = controller
            .max_retries(2)
            .on_error(move |error, count| sink.lock().unwrap().push((error.message.clone(), count)));

        controller.handle_error(Error::new("network down"));
        let state = controller.state();
        assert_eq!(state.retry_count, 1);
        assert!(state.can_retry);
        assert_eq!(state.error.as_ref().map(|e| e.message.as_str()), Some("network down"));

        controller.handle_error(Error::new("network still down"));
        let state = controller.state();
        assert_eq!(state.retry_count, 2);
        assert!(!state.can_retry);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("network down".to_string(), 1), ("network still down".to_string(), 2)]
        );
        assert_eq!(metrics.len(), 2);
        assert!(metrics.events().iter().all(|event| !event.recovered));
    }

    #[test]
    fn test_strategy_follows_current_error() {
        let (_metrics, controller) = controller("Header");
        assert!(controller.strategy().is_none());

        controller.handle_error(Error::new("boom"));
        assert_eq!(controller.strategy().map(|s| s.strategy), Some(Strategy::Reload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_resets_state() {
        let recovered = Arc::new(AtomicU32::new(0));
        let seen = recovered.clone();
        let (metrics, controller) = controller("EventsList");
        let controller = controller
            .retry_delay(Duration::from_millis(1000))
            .on_recovery(move |count| seen.store(count, Ordering::SeqCst));

        controller.handle_error(Error::new("timeout loading events"));
        controller.handle_error(Error::new("timeout loading events"));

        let started = Instant::now();
        let outcome = controller.retry_with(|| async { Ok(()) }).await;

        assert_eq!(outcome, RetryOutcome::Recovered);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(controller.state(), RetryState::initial());
        assert_eq!(recovered.load(Ordering::SeqCst), 2);

        let events = metrics.events();
        assert_eq!(events.len(), 3);
        assert!(events[2].recovered);
        assert_eq!(events[2].message, "timeout loading events");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failure_keeps_counting() {
        let (metrics, controller) = controller("NewHires");
        controller.handle_error(Error::new("boom"));

        let outcome = controller
            .retry_with(|| async { Err(Error::new("boom again")) })
            .await;

        assert_eq!(outcome, RetryOutcome::Failed);
        let state = controller.state();
        assert_eq!(state.retry_count, 2);
        assert!(state.can_retry);
        assert!(!state.is_retrying);
        assert_eq!(state.error.map(|e| e.message), Some("boom again".to_string()));
        assert_eq!(metrics.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_when_exhausted() {
        let (_metrics, controller) = controller("Spaces");
        let controller = controller.max_retries(1);
        controller.handle_error(Error::new("boom"));

        let called = &AtomicBool::new(false);
        let outcome = controller
            .retry_with(move || async move {
                called.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Skipped);
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(controller.state().retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retries_allows_one_attempt() {
        let (_metrics, controller) = controller("Weather");
        let controller = controller.max_retries(0);
        assert!(controller.state().can_retry);

        controller.handle_error(Error::new("boom"));
        assert!(!controller.state().can_retry);
        assert_eq!(controller.retry().await, RetryOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_without_fn_waits_then_resets() {
        let (metrics, controller) = controller("QuickLinks");
        controller.handle_error(Error::new("boom"));

        let started = Instant::now();
        assert_eq!(controller.retry().await, RetryOutcome::Recovered);
        assert_eq!(started.elapsed(), DEFAULT_RETRY_DELAY);
        assert_eq!(controller.state(), RetryState::initial());
        assert!(metrics.events()[1].recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_retry_is_skipped() {
        let (_metrics, controller) = controller("Apps");
        controller.handle_error(Error::new("boom"));

        let (first, second) = tokio::join!(controller.retry(), controller.retry());

        assert_eq!(first, RetryOutcome::Recovered);
        assert_eq!(second, RetryOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_retry() {
        let (metrics, controller) = controller("Carousel");
        controller.handle_error(Error::new("network down"));

        let called = &AtomicBool::new(false);
        let (outcome, _) = tokio::join!(
            controller.retry_with(move || async move {
                called.store(true, Ordering::SeqCst);
                Ok(())
            }),
            async {
                sleep(Duration::from_millis(100)).await;
                controller.reset();
            }
        );

        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(controller.state(), RetryState::initial());
        assert_eq!(metrics.len(), 1);

        // The controller stays usable after a reset
        controller.handle_error(Error::new("network down"));
        assert_eq!(controller.retry().await, RetryOutcome::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_discards_in_flight_retry() {
        let (metrics, controller) = controller("Sidebar");
        controller.handle_error(Error::new("boom"));

        let (outcome, _) = tokio::join!(
            controller.retry_with(|| async {
                sleep(Duration::from_millis(5_000)).await;
                Ok(())
            }),
            async {
                sleep(Duration::from_millis(2_000)).await;
                controller.cleanup();
            }
        );

        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert_eq!(controller.state().retry_count, 1);
        assert!(metrics.events().iter().all(|event| !event.recovered));
        assert_eq!(controller.retry().await, RetryOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_run_routes_errors() {
        let (_metrics, controller) = controller("Announcements");

        assert_eq!(controller.run(|| async { Ok(5) }).await, Some(5));
        assert_eq!(
            controller
                .run(|| async { Err::<u32, _>(Error::new("could not parse feed")) })
                .await,
            None
        );
        assert_eq!(controller.state().retry_count, 1);
        assert_eq!(controller.strategy().map(|s| s.strategy), Some(Strategy::Fallback));
    }

    #[test]
    fn test_from_config() {
        let mut config = RecoveryConfig::default();
        config.retry.max_retries = 1;
        config.critical_components = vec!["AppLauncher".to_string()];

        let controller = ErrorController::from_config("AppLauncher", &config)
            .with_metrics(Arc::new(ErrorMetrics::new()));
        controller.handle_error(Error::new("boom"));

        assert!(!controller.state().can_retry);
        assert_eq!(controller.strategy().map(|s| s.strategy), Some(Strategy::Reload));
    }
}
