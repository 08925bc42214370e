//! # Error Classification
//!
//! Heuristic classification of failures by substring matching on the error
//! message and exact matching on the error name. The checks are ordered and
//! the first match wins; they are not meant to be exhaustive.
//!
//! Matching is case-sensitive. Note that `"timeout"` is one of the network
//! markers, so a message containing it is always classified as a network
//! failure before the dedicated timeout check is reached.

use serde::{Deserialize, Serialize};

use crate::types::{Error, ErrorKind};

const NETWORK_MARKERS: [&str; 3] = ["fetch", "network", "timeout"];
const NETWORK_ERROR_NAME: &str = "NetworkError";

const DATA_MARKERS: [&str; 3] = ["validation", "parse", "JSON"];
const DATA_ERROR_NAME: &str = "ValidationError";

const TIMEOUT_MARKER: &str = "timeout";
const PERMISSION_MARKERS: [&str; 2] = ["permission", "unauthorized"];

pub const NETWORK_MESSAGE: &str =
    "Error de conexión. Verifica tu conexión a internet e inténtalo de nuevo.";
pub const DATA_MESSAGE: &str = "Error al procesar los datos. Por favor, recarga la página.";
pub const TIMEOUT_MESSAGE: &str = "La operación tardó demasiado. Por favor, inténtalo de nuevo.";
pub const PERMISSION_MESSAGE: &str = "No tienes permisos para acceder a este contenido.";
pub const GENERIC_MESSAGE: &str = "Ha ocurrido un error inesperado. Por favor, inténtalo de nuevo.";

/// Result of classifying an error; recomputed on demand, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub user_message: String,
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}

/// True for connectivity-indicative failures
pub fn is_network_error(error: &Error) -> bool {
    contains_any(&error.message, &NETWORK_MARKERS) || error.name == NETWORK_ERROR_NAME
}

/// True for validation or parse failures
pub fn is_data_error(error: &Error) -> bool {
    contains_any(&error.message, &DATA_MARKERS) || error.name == DATA_ERROR_NAME
}

/// Classifies an error into its semantic kind and user-facing message
pub fn classify(error: &Error) -> ClassifiedError {
    let (kind, user_message) = if is_network_error(error) {
        (ErrorKind::Network, NETWORK_MESSAGE)
    } else if is_data_error(error) {
        (ErrorKind::Data, DATA_MESSAGE)
    } else if error.message.contains(TIMEOUT_MARKER) {
        (ErrorKind::Timeout, TIMEOUT_MESSAGE)
    } else if contains_any(&error.message, &PERMISSION_MARKERS) {
        (ErrorKind::Permission, PERMISSION_MESSAGE)
    } else {
        (ErrorKind::Unknown, GENERIC_MESSAGE)
    };

    ClassifiedError {
        kind,
        user_message: user_message.to_string(),
    }
}

/// Localized message safe to show to the user
pub fn friendly_message(error: &Error) -> String {
    classify(error).user_message
}
