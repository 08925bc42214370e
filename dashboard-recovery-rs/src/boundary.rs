//! # Error Boundaries
//!
//! An [`ErrorBoundary`] supervises the render function of a dashboard
//! subtree. A render that returns `Err` or panics moves the boundary from
//! [`BoundaryState::Healthy`] to [`BoundaryState::Failed`]; from then on the
//! boundary renders fallback output without calling the subtree again.
//!
//! A failed boundary never heals by itself. The only way back to `Healthy`
//! is a remount with a different key, which is what the owner does when the
//! user asks to retry (see [`BoundaryHost`]).
//!
//! ```
//! use dashboard_recovery_rs::boundary::{ErrorBoundary, Rendered};
//! use dashboard_recovery_rs::Error;
//!
//! let mut boundary: ErrorBoundary<String> = ErrorBoundary::new("NewsSection");
//! let output = boundary.render(|scope| {
//!     scope.component("NewsCarousel", |_| Err(Error::new("feed unavailable")))
//! });
//! assert!(matches!(output, Rendered::DefaultFallback(_)));
//! assert!(boundary.is_failed());
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::classifier::friendly_message;
use crate::error_metrics::{metrics_enabled, ErrorMetrics};
use crate::sanitization::error_details;
use crate::types::{Error, Result};

pub const DEFAULT_FALLBACK_TITLE: &str = "Algo salió mal";
/// Name given to errors built from a caught panic
pub const PANIC_ERROR_NAME: &str = "RenderPanic";

/// Called once per failure with the error and the component trace
pub type BoundaryCallback = Arc<dyn Fn(&Error, &ComponentTrace) + Send + Sync>;
/// Produces custom fallback output for a caught failure
pub type FallbackRenderer<V> = Box<dyn Fn(&CaughtError) -> V + Send + Sync>;

/// Component names from the boundary down to the failing component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTrace {
    frames: Vec<String>,
}

impl ComponentTrace {
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// The component that failed, if any was entered
    pub fn failing_component(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for ComponentTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            writeln!(f, "    in {}", frame)?;
        }
        Ok(())
    }
}

/// Tracks which component is rendering so failures carry a trace
#[derive(Debug, Default)]
pub struct RenderScope {
    stack: Vec<String>,
    // Trace of the innermost frame that returned the given error
    failure_trace: Option<(Uuid, ComponentTrace)>,
}

impl RenderScope {
    fn new() -> Self {
        Self::default()
    }

    /// Renders a named child component
    pub fn component<T, F>(&mut self, name: &str, render: F) -> Result<T>
    where
        F: FnOnce(&mut RenderScope) -> Result<T>,
    {
        self.stack.push(name.to_string());
        let result = render(self);
        if let Err(error) = &result {
            // Outer frames propagating the same error keep the innermost trace
            let propagated = matches!(&self.failure_trace, Some((id, _)) if *id == error.id);
            if !propagated {
                self.failure_trace = Some((error.id, self.trace()));
            }
        }
        self.stack.pop();
        result
    }

    /// Current component stack
    pub fn trace(&self) -> ComponentTrace {
        ComponentTrace {
            frames: self.stack.clone(),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Trace recorded for `error`, or the current stack if it was raised here
    fn take_failure_trace(&mut self, error: &Error) -> ComponentTrace {
        match self.failure_trace.take() {
            Some((id, trace)) if id == error.id => trace,
            _ => self.trace(),
        }
    }
}

/// A failure intercepted by a boundary
#[derive(Debug, Clone)]
pub struct CaughtError {
    pub error: Error,
    pub trace: ComponentTrace,
    pub caught_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum BoundaryState {
    Healthy,
    Failed(CaughtError),
}

impl BoundaryState {
    pub fn is_failed(&self) -> bool {
        matches!(self, BoundaryState::Failed(_))
    }
}

/// Built-in fallback shown when no custom fallback was supplied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackNotice {
    pub title: String,
    pub message: String,
    /// Sanitized error details, only when disclosure is enabled
    pub details: Option<String>,
}

/// Output of [`ErrorBoundary::render`]
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<V> {
    Content(V),
    CustomFallback(V),
    DefaultFallback(FallbackNotice),
}

impl<V> Rendered<V> {
    pub fn is_content(&self) -> bool {
        matches!(self, Rendered::Content(_))
    }

    pub fn is_fallback(&self) -> bool {
        !self.is_content()
    }

    pub fn content(self) -> Option<V> {
        match self {
            Rendered::Content(value) => Some(value),
            _ => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "render panicked".to_string()
    }
}

pub struct ErrorBoundary<V> {
    name: String,
    key: u64,
    state: BoundaryState,
    fallback: Option<FallbackRenderer<V>>,
    on_error: Option<BoundaryCallback>,
    metrics: Arc<ErrorMetrics>,
    show_details: bool,
}

impl<V> ErrorBoundary<V> {
    /// A healthy boundary reporting to the global metrics under `name`
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            key: 0,
            state: BoundaryState::Healthy,
            fallback: None,
            on_error: None,
            metrics: ErrorMetrics::global(),
            show_details: false,
        }
    }

    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&CaughtError) -> V + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error, &ComponentTrace) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ErrorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn show_details(mut self, show_details: bool) -> Self {
        self.show_details = show_details;
        self
    }

    pub fn with_key(mut self, key: u64) -> Self {
        self.key = key;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn state(&self) -> &BoundaryState {
        &self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Renders the subtree, or the fallback if the boundary has failed
    pub fn render<F>(&mut self, render: F) -> Rendered<V>
    where
        F: FnOnce(&mut RenderScope) -> Result<V>,
    {
        if let BoundaryState::Failed(caught) = &self.state {
            return self.fallback_for(caught);
        }

        let mut scope = RenderScope::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| render(&mut scope)));

        let (error, trace) = match outcome {
            Ok(Ok(view)) => return Rendered::Content(view),
            Ok(Err(error)) => {
                let trace = scope.take_failure_trace(&error);
                (error, trace)
            }
            // Unwinding skipped the pops, so the stack still ends at the panicking component
            Err(payload) => (
                Error::named(PANIC_ERROR_NAME, panic_message(payload.as_ref())),
                scope.trace(),
            ),
        };

        let caught = self.capture(error, trace);
        self.fallback_for(&caught)
    }

    /// Forces a fresh mount when `key` differs from the current one.
    /// Returns whether the boundary was remounted.
    pub fn remount(&mut self, key: u64) -> bool {
        if key == self.key {
            return false;
        }

        let was_failed = self.state.is_failed();
        self.key = key;
        self.state = BoundaryState::Healthy;

        if was_failed {
            info!(boundary = %self.name, key = key, "Error boundary remounted");
        } else {
            debug!(boundary = %self.name, key = key, "Error boundary remounted");
        }
        true
    }

    fn capture(&mut self, error: Error, trace: ComponentTrace) -> CaughtError {
        error!(
            boundary = %self.name,
            error_id = %error.id,
            error = %error,
            component = trace.failing_component().unwrap_or("-"),
            "Error boundary caught a render failure"
        );

        self.metrics.record_error(&self.name, &error, false);
        if metrics_enabled() {
            ::metrics::counter!("dashboard.boundary.caught", 1, "boundary" => self.name.clone());
        }
        if let Some(on_error) = &self.on_error {
            on_error(&error, &trace);
        }

        let caught = CaughtError {
            error,
            trace,
            caught_at: Utc::now(),
        };
        self.state = BoundaryState::Failed(caught.clone());
        caught
    }

    fn fallback_for(&self, caught: &CaughtError) -> Rendered<V> {
        match &self.fallback {
            Some(fallback) => Rendered::CustomFallback(fallback(caught)),
            None => Rendered::DefaultFallback(FallbackNotice {
                title: DEFAULT_FALLBACK_TITLE.to_string(),
                message: friendly_message(&caught.error),
                details: self.show_details.then(|| {
                    let mut details = error_details(&caught.error);
                    if !caught.trace.is_empty() {
                        details.push('\n');
                        details.push_str(caught.trace.to_string().trim_end());
                    }
                    details
                }),
            }),
        }
    }
}

impl<V> fmt::Debug for ErrorBoundary<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("custom_fallback", &self.fallback.is_some())
            .field("show_details", &self.show_details)
            .finish()
    }
}

/// Owner side of a boundary: retrying remounts it under a new key
#[derive(Debug)]
pub struct BoundaryHost<V> {
    boundary: ErrorBoundary<V>,
    retries: u64,
}

impl<V> BoundaryHost<V> {
    pub fn new(boundary: ErrorBoundary<V>) -> Self {
        Self {
            boundary,
            retries: 0,
        }
    }

    pub fn render<F>(&mut self, render: F) -> Rendered<V>
    where
        F: FnOnce(&mut RenderScope) -> Result<V>,
    {
        self.boundary.render(render)
    }

    /// Remounts the boundary with a fresh identity
    pub fn retry(&mut self) {
        self.retries += 1;
        let key = self.boundary.key().wrapping_add(1);
        self.boundary.remount(key);
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn boundary(&self) -> &ErrorBoundary<V> {
        &self.boundary
    }
}
