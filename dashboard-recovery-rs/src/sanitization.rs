//! # Error Sanitization
//!
//! Raw error text only reaches the screen through the opt-in details
//! disclosure of a fallback view. Before that happens it goes through here so
//! tokens, e-mail addresses and similar data picked up from failed requests
//! are not shown verbatim.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Error;

const REDACTED: &str = "[REDACTED]";

const PATTERN_SOURCES: [&str; 5] = [
    // API keys, tokens, credentials
    r#"(?i)(api[_-]?key|token|secret|password|credential)s?["']?\s*[=:]\s*["']?([^"'\s]+)"#,
    // Bearer tokens
    r"(?i)bearer\s+([a-zA-Z0-9\._\-]+)",
    // JWTs
    r"eyJ[a-zA-Z0-9\-_]+\.eyJ[a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+",
    // Email addresses
    r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
    // IP addresses
    r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b",
];

// A pattern that fails to compile is skipped; the test module checks that
// every source compiles.
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    PATTERN_SOURCES
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "secret", "token", "key", "credential", "auth", "cookie", "session",
    ]
    .into_iter()
    .collect()
});

/// Determines if a context key should be hidden
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|sensitive| key.contains(sensitive))
}

/// Redacts sensitive fragments from free text
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    for pattern in SENSITIVE_PATTERNS.iter() {
        sanitized = pattern
            .replace_all(&sanitized, |caps: &regex::Captures| match caps.get(2) {
                // Keep the key name but redact the value
                Some(_) => format!("{}={}", &caps[1], REDACTED),
                None if caps.len() > 1 => caps[0].replace(&caps[1], REDACTED),
                None => REDACTED.to_string(),
            })
            .into_owned();
    }

    sanitized
}

/// Text for the details disclosure: name, sanitized message and the
/// non-sensitive context keys, one per line
pub fn error_details(error: &Error) -> String {
    let mut details = format!("{}: {}", error.name, sanitize_message(&error.message));

    for (key, value) in error.context.iter() {
        if is_sensitive_key(key) {
            continue;
        }
        let value = match value.as_str() {
            Some(text) => sanitize_message(text),
            None => value.to_string(),
        };
        details.push_str(&format!("\n{}: {}", key, value));
    }

    details
}
