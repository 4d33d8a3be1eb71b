//! Domain-specific error types for runtime backends.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Errors that can occur during container runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The backend (daemon or CLI tool) is not reachable.
    #[error("Container runtime is not available: {message}")]
    Unavailable { message: String },

    /// The named container does not exist.
    #[error("Container not found: {name}")]
    NotFound { name: String },

    /// A backend call (create, start, exec, etc.) failed.
    #[error("Container operation failed: {message}")]
    CommandFailed { message: String },

    /// A backend call exceeded its time budget.
    #[error("Container operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The backend does not implement an optional capability.
    #[error("Runtime backend '{backend}' does not support {capability}")]
    Unsupported {
        backend: &'static str,
        capability: &'static str,
    },
}

impl RuntimeError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a `CommandFailed` error.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `Unsupported` error.
    pub fn unsupported(backend: &'static str, capability: &'static str) -> Self {
        Self::Unsupported {
            backend,
            capability,
        }
    }

    /// Returns true if this is a not-found error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is an unavailability error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns true if the backend lacks the requested capability.
    #[allow(dead_code)] // Public API for callers
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_error() {
        let err = RuntimeError::unavailable("daemon not running");
        assert!(err.is_unavailable());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Container runtime is not available: daemon not running"
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = RuntimeError::not_found("corral-alpha");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Container not found: corral-alpha");
    }

    #[test]
    fn test_timeout_error() {
        let err = RuntimeError::timeout(Duration::from_secs(30));
        assert_eq!(
            err.to_string(),
            "Container operation timed out after 30 seconds"
        );
    }

    #[test]
    fn test_unsupported_error() {
        let err = RuntimeError::unsupported("nixos-container", "log viewing");
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "Runtime backend 'nixos-container' does not support log viewing"
        );
    }

    #[test]
    fn test_error_variants_are_distinct() {
        let missing = RuntimeError::not_found("x");
        let down = RuntimeError::unavailable("x");
        let failed = RuntimeError::command_failed("x");

        assert!(missing.is_not_found());
        assert!(!missing.is_unavailable());
        assert!(!missing.is_unsupported());

        assert!(!down.is_not_found());
        assert!(down.is_unavailable());

        assert!(!failed.is_not_found());
        assert!(!failed.is_unavailable());
        assert!(!failed.is_unsupported());
    }
}
