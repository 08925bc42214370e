//! # Error Metrics
//!
//! Process-wide log of component failures. The log keeps at most
//! [`MAX_EVENTS`] entries, evicting the oldest first, and aggregate
//! statistics only look at the trailing [`STATS_WINDOW_MS`].
//!
//! [`ErrorMetrics::global`] hands out the shared instance; components that
//! want isolation (tests mostly) build their own with [`ErrorMetrics::new`]
//! or [`ErrorMetrics::with_clock`] and pass it around explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::types::Error;

/// Hard cap on the number of stored events
pub const MAX_EVENTS: usize = 100;
/// Width of the statistics window (one hour)
pub const STATS_WINDOW_MS: i64 = 3_600_000;
pub const STATS_WINDOW_LABEL: &str = "1 hour";

static GLOBAL_METRICS: Lazy<Arc<ErrorMetrics>> = Lazy::new(|| Arc::new(ErrorMetrics::new()));

static EMIT_METRICS: AtomicBool = AtomicBool::new(true);

/// Enables or disables counters sent through the `metrics` facade
pub fn set_metrics_emission(enabled: bool) {
    EMIT_METRICS.store(enabled, Ordering::Relaxed);
}

pub(crate) fn metrics_enabled() -> bool {
    EMIT_METRICS.load(Ordering::Relaxed)
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub component: String,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub recovered: bool,
}

/// Aggregates over the trailing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total_errors: usize,
    pub recovered_errors: usize,
    /// Percentage, rounded; 100 when there are no errors
    pub recovery_rate: u32,
    pub component_stats: HashMap<String, usize>,
    pub time_window: String,
}

#[derive(Debug)]
pub struct ErrorMetrics {
    events: Mutex<VecDeque<ErrorEvent>>,
    clock: Arc<dyn Clock>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(MAX_EVENTS)),
            clock,
        }
    }

    /// The shared instance, built on first use
    pub fn global() -> Arc<Self> {
        GLOBAL_METRICS.clone()
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ErrorEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a failure for `component`, evicting the oldest entries past the cap
    pub fn record_error(&self, component: &str, error: &Error, recovered: bool) {
        let event = ErrorEvent {
            component: component.to_string(),
            message: error.message.clone(),
            timestamp: self.clock.now_millis(),
            recovered,
        };

        let stored = {
            let mut events = self.lock();
            events.push_back(event);
            while events.len() > MAX_EVENTS {
                events.pop_front();
            }
            events.len()
        };

        if recovered {
            info!(
                component = %component,
                error_id = %error.id,
                error = %error,
                "Component recovered from error"
            );
        } else {
            debug!(
                component = %component,
                error_id = %error.id,
                error = %error,
                stored = stored,
                "Recorded component error"
            );
        }

        if metrics_enabled() {
            ::metrics::counter!("dashboard.errors.recorded", 1, "component" => component.to_string());
            if recovered {
                ::metrics::counter!("dashboard.errors.recovered", 1, "component" => component.to_string());
            }
            ::metrics::gauge!("dashboard.errors.stored", stored as f64);
        }
    }

    /// Statistics over events newer than one hour
    pub fn get_error_stats(&self) -> ErrorStats {
        let cutoff = self.clock.now_millis() - STATS_WINDOW_MS;
        let events = self.lock();

        let mut total_errors = 0;
        let mut recovered_errors = 0;
        let mut component_stats: HashMap<String, usize> = HashMap::new();

        for event in events.iter().filter(|event| event.timestamp > cutoff) {
            total_errors += 1;
            if event.recovered {
                recovered_errors += 1;
            }
            *component_stats.entry(event.component.clone()).or_default() += 1;
        }

        let recovery_rate = if total_errors > 0 {
            (recovered_errors as f64 / total_errors as f64 * 100.0).round() as u32
        } else {
            100
        };

        ErrorStats {
            total_errors,
            recovered_errors,
            recovery_rate,
            component_stats,
            time_window: STATS_WINDOW_LABEL.to_string(),
        }
    }

    pub fn clear_metrics(&self) {
        self.lock().clear();
        if metrics_enabled() {
            ::metrics::gauge!("dashboard.errors.stored", 0.0);
        }
    }

    /// Snapshot of the raw log, oldest first
    pub fn events(&self) -> Vec<ErrorEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
