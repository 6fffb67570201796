//! Shared primitives used across Periscope crates.

use core::fmt;

/// Result alias used across the workspace.
pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level error type carried between the relay pipeline crates.
///
/// Codes are dot-namespaced by subsystem (`url.*`, `relay.*`, `net.*`,
/// `ipc.*`, `settings.*`) so call sites can match on the class of
/// failure without parsing the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError {
    pub code: &'static str,
    pub message: String,
}

impl RelayError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RelayError {}
