//! # Dashboard Recovery
//!
//! Error classification, retry and recovery framework for the intranet
//! dashboard. Widgets fail independently; this crate decides what the user
//! sees when they do and how the dashboard tries to get back on its feet.
//!
//! ## Features
//!
//! - Classification of failures into network, data, timeout, permission and
//!   unknown kinds, with a user-facing message for each
//! - Retry with exponential backoff for async operations
//! - A bounded, process-wide log of failures with rolling statistics
//! - Recovery strategy selection (retry, fallback or reload)
//! - Error boundaries that isolate failing component subtrees
//! - A per-component controller with cancellable retries
//! - Structured logging and layered configuration
//!

pub mod types;
pub mod classifier;
pub mod strategy;
pub mod retry;
pub mod clock;
pub mod timer;
pub mod error_metrics;
pub mod sanitization;
pub mod boundary;
pub mod controller;
pub mod logging;
pub mod settings;

// Re-export commonly used types
pub use types::{Error, ErrorKind, Result, SetupError};
pub use classifier::{classify, friendly_message, is_data_error, is_network_error, ClassifiedError};
pub use strategy::{select_strategy, RecoveryStrategy, Strategy, StrategySelector};
pub use retry::{retry_with_backoff, RetryOptions};
pub use error_metrics::{set_metrics_emission, ErrorEvent, ErrorMetrics, ErrorStats};
pub use boundary::{BoundaryHost, ErrorBoundary, Rendered};
pub use controller::{ErrorController, RetryOutcome, RetryState};
pub use logging::{init_logging, LoggingConfig};
pub use settings::RecoveryConfig;

/// Loads configuration from the environment and initializes logging
pub fn init() -> std::result::Result<RecoveryConfig, SetupError> {
    let config = RecoveryConfig::load()?;
    init_with_config(config.clone())?;
    Ok(config)
}

/// Initializes logging and metrics emission from an explicit configuration
pub fn init_with_config(config: RecoveryConfig) -> std::result::Result<(), SetupError> {
    init_logging(Some(config.logging))?;
    set_metrics_emission(config.record_metrics);
    Ok(())
}

#[cfg(test)]
mod tests;
