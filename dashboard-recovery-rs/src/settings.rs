//! # Configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional `dashboard-recovery.toml`, then `DASHBOARD__*` environment
//! variables (a `.env` file is loaded first if present). For example
//! `DASHBOARD__RETRY__MAX_RETRIES=5` or `DASHBOARD__LOGGING__LEVEL=debug`.

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::strategy::{StrategySelector, CRITICAL_COMPONENTS};
use crate::types::SetupError;

pub const CONFIG_FILE: &str = "dashboard-recovery";
pub const ENV_PREFIX: &str = "DASHBOARD";

/// Defaults for retry attempts and backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl TryFrom<config::Config> for RetrySettings {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = RetrySettings::default();

        if let Ok(max_retries) = cfg.get::<u32>("retry.max_retries") {
            base.max_retries = max_retries;
        }
        if let Ok(retry_delay_ms) = cfg.get::<u64>("retry.retry_delay_ms") {
            base.retry_delay_ms = retry_delay_ms;
        }

        Ok(base)
    }
}

/// Top-level settings for the recovery subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub logging: LoggingConfig,
    pub retry: RetrySettings,
    /// Components whose failure triggers a full reload
    pub critical_components: Vec<String>,
    /// Whether fallback views may disclose sanitized error details
    pub show_error_details: bool,
    /// Whether counters are sent through the `metrics` facade
    pub record_metrics: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            retry: RetrySettings::default(),
            critical_components: CRITICAL_COMPONENTS.iter().map(|c| c.to_string()).collect(),
            show_error_details: false,
            record_metrics: true,
        }
    }
}

impl RecoveryConfig {
    /// Loads `.env`, the optional config file and the environment
    pub fn load() -> Result<Self, SetupError> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("critical_components")
                    .try_parsing(true),
            )
            .build()?;

        Ok(Self::try_from(cfg)?)
    }

    pub fn strategy_selector(&self) -> StrategySelector {
        StrategySelector::new(self.critical_components.iter().cloned())
    }
}

impl TryFrom<config::Config> for RecoveryConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = RecoveryConfig {
            logging: LoggingConfig::try_from(cfg.clone())?,
            retry: RetrySettings::try_from(cfg.clone())?,
            ..RecoveryConfig::default()
        };

        if let Ok(components) = cfg.get::<Vec<String>>("critical_components") {
            base.critical_components = components;
        }
        if let Ok(show_error_details) = cfg.get::<bool>("show_error_details") {
            base.show_error_details = show_error_details;
        }
        if let Ok(record_metrics) = cfg.get::<bool>("record_metrics") {
            base.record_metrics = record_metrics;
        }

        Ok(base)
    }
}
