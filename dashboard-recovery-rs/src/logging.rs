//! # Structured Logging
//!
//! One-shot installation of the global `tracing` subscriber: JSON or text to
//! stdout, plus an optional daily-rolling log file.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::types::SetupError;

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Name attached to the startup event and used for the log file name
    pub service_name: String,
    /// Whether to use JSON formatting on stdout
    pub json_format: bool,
    /// Whether to also write logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "intranet-dashboard".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }

        Ok(base)
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<(), SetupError> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let stdout_layer = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let file_layer = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = NonBlocking::new(appender);

            // The guard flushes on drop; keep it for the life of the process
            Box::leak(Box::new(guard));

            Some(fmt::layer().with_writer(writer).with_ansi(false).boxed())
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SetupError::Logging(e.to_string()))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", true)
            .unwrap()
            .build()
            .unwrap();

        let logging = LoggingConfig::try_from(cfg).unwrap();
        assert_eq!(logging.level, "debug");
        assert!(logging.json_format);
        assert_eq!(logging.service_name, "intranet-dashboard");
        assert!(logging.log_dir.is_none());
    }
}
