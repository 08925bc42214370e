//! # Error Types
//!
//! The failure shape this crate consumes and reports. Dashboard components
//! hand over arbitrary failures; all the recovery machinery looks at is the
//! error's `name` and `message`, so those two fields are the core of
//! [`Error`]. Everything else is metadata kept for logging and inspection.

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Name given to errors created without an explicit one
pub const DEFAULT_ERROR_NAME: &str = "Error";

/// Semantic kind of a failure, derived from its name and message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connectivity, fetch or timeout indicative failure
    Network,
    /// Validation, parse or JSON indicative failure
    Data,
    /// Timed out without being classified as a network failure
    Timeout,
    /// Permission or authorization failure
    Permission,
    /// Anything else
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Data => write!(f, "data"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure raised by a dashboard component or one of its async operations.
///
/// `Clone` is implemented manually: clones keep every structured field but
/// drop the opaque `cause` and `backtrace`, which only make sense at the
/// original creation site.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// Error name, e.g. `NetworkError` or `ValidationError`
    pub name: String,
    /// Descriptive message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause (not serialized)
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
    /// Backtrace (not serialized)
    #[serde(skip)]
    pub backtrace: Option<Backtrace>,
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp,
            context: self.context.clone(),
            cause: None,
            backtrace: None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Error {
    /// Creates a new error with the default name and the given message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self::named(DEFAULT_ERROR_NAME, message)
    }

    /// Creates a new error with an explicit name
    pub fn named<N, S>(name: N, message: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            message: message.into(),
            timestamp: Utc::now(),
            context: serde_json::Map::new(),
            cause: None,
            backtrace: Some(Backtrace::capture()),
        }
    }

    /// Wraps any standard error, using its type name as the error name
    pub fn capture<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let full_name = std::any::type_name::<E>();
        let name = full_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(DEFAULT_ERROR_NAME)
            .to_string();

        Self::named(name, err.to_string()).cause(err)
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Classifies this error, see [`crate::classifier::classify`]
    pub fn kind(&self) -> ErrorKind {
        crate::classifier::classify(self).kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let name = match err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => "NetworkError",
            std::io::ErrorKind::PermissionDenied => "PermissionError",
            _ => "IoError",
        };
        Self::named(name, err.to_string()).cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::named("SyntaxError", format!("JSON parse error: {}", err)).cause(err)
    }
}

/// Failures while bringing up the logging and configuration layers
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to install tracing subscriber: {0}")]
    Logging(String),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}
