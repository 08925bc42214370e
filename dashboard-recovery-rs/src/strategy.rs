//! # Recovery Strategy Selection
//!
//! Maps a failure and the component that raised it to a recommended
//! remediation. A plain decision table, first match wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::{is_data_error, is_network_error};
use crate::types::Error;

/// Components whose failure leaves the dashboard unusable
pub const CRITICAL_COMPONENTS: [&str; 2] = ["Header", "Layout"];

pub const RETRY_MESSAGE: &str = "Reintentando conexión...";
pub const DATA_FALLBACK_MESSAGE: &str = "Usando datos de respaldo...";
pub const RELOAD_MESSAGE: &str = "Recargando aplicación...";
pub const CONTENT_FALLBACK_MESSAGE: &str = "Mostrando contenido alternativo...";

/// Recommended remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Wait and try the operation again
    Retry,
    /// Swap in fallback content
    Fallback,
    /// Reload the whole application
    Reload,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Retry => write!(f, "retry"),
            Strategy::Fallback => write!(f, "fallback"),
            Strategy::Reload => write!(f, "reload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStrategy {
    /// Always true in the current decision table
    pub can_recover: bool,
    pub strategy: Strategy,
    pub message: String,
}

impl RecoveryStrategy {
    fn recoverable(strategy: Strategy, message: &str) -> Self {
        Self {
            can_recover: true,
            strategy,
            message: message.to_string(),
        }
    }
}

/// Strategy selector with a configurable critical-component allowlist
#[derive(Debug, Clone)]
pub struct StrategySelector {
    critical_components: Vec<String>,
}

impl StrategySelector {
    pub fn new<I, S>(critical_components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            critical_components: critical_components.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_critical(&self, component: &str) -> bool {
        self.critical_components.iter().any(|c| c == component)
    }

    pub fn select(&self, error: &Error, component: &str) -> RecoveryStrategy {
        if is_network_error(error) {
            RecoveryStrategy::recoverable(Strategy::Retry, RETRY_MESSAGE)
        } else if is_data_error(error) {
            RecoveryStrategy::recoverable(Strategy::Fallback, DATA_FALLBACK_MESSAGE)
        } else if self.is_critical(component) {
            RecoveryStrategy::recoverable(Strategy::Reload, RELOAD_MESSAGE)
        } else {
            RecoveryStrategy::recoverable(Strategy::Fallback, CONTENT_FALLBACK_MESSAGE)
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(CRITICAL_COMPONENTS)
    }
}

/// Selects a strategy using the default critical-component list
pub fn select_strategy(error: &Error, component: &str) -> RecoveryStrategy {
    StrategySelector::default().select(error, component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_retries() {
        let strategy = select_strategy(&Error::new("network down"), "NewsCarousel");
        assert_eq!(
            strategy,
            RecoveryStrategy {
                can_recover: true,
                strategy: Strategy::Retry,
                message: "Reintentando conexión...".to_string(),
            }
        );
    }

    #[test]
    fn test_data_error_uses_fallback_data() {
        let strategy = select_strategy(&Error::named("ValidationError", "bad json"), "NewsCarousel");
        assert_eq!(strategy.strategy, Strategy::Fallback);
        assert_eq!(strategy.message, DATA_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_critical_component_reloads() {
        let strategy = select_strategy(&Error::new("boom"), "Header");
        assert_eq!(strategy.strategy, Strategy::Reload);
        assert_eq!(strategy.message, RELOAD_MESSAGE);
    }

    #[test]
    fn test_network_wins_over_critical_component() {
        let strategy = select_strategy(&Error::new("fetch aborted"), "Layout");
        assert_eq!(strategy.strategy, Strategy::Retry);
    }

    #[test]
    fn test_other_components_fall_back() {
        let strategy = select_strategy(&Error::new("boom"), "EventsList");
        assert_eq!(strategy.strategy, Strategy::Fallback);
        assert_eq!(strategy.message, CONTENT_FALLBACK_MESSAGE);
        assert!(strategy.can_recover);
    }

    #[test]
    fn test_custom_allowlist() {
        let selector = StrategySelector::new(["AppLauncher"]);
        assert_eq!(selector.select(&Error::new("boom"), "AppLauncher").strategy, Strategy::Reload);
        assert_eq!(selector.select(&Error::new("boom"), "Header").strategy, Strategy::Fallback);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(select_strategy(&Error::new("boom"), "Header")).unwrap();
        assert_eq!(value["canRecover"], true);
        assert_eq!(value["strategy"], "reload");
    }
}
