//! Error taxonomy for sandbox operations.
//!
//! Every failure that reaches the CLI is classified into one of these kinds so
//! that scripts can branch on the process exit code rather than parsing
//! message text.

/// Exit code for failures that carry no `CorralError` classification.
pub(crate) const EXIT_UNCLASSIFIED: i32 = 1;

/// Errors surfaced by lifecycle, reconciliation and store operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CorralError {
    /// Bad name, flags or request; rejected before any side effect.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// Record or container is missing.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// Record exists but its container is not live.
    #[error("Sandbox is not running: {name}")]
    NotRunning { name: String },

    /// Every slot in the configured range is taken.
    #[error("No free network slot in range {lo}-{hi}")]
    AllocationExhausted { lo: u8, hi: u8 },

    /// A runtime, workspace or generator call failed.
    #[error("{op} failed: {source:#}")]
    Backend {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed persisted JSON or config file.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CorralError {
    /// Creates a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error for a sandbox record.
    pub fn sandbox_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            what: "Sandbox",
            name: name.into(),
        }
    }

    /// Creates a `NotFound` error for a runtime container.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            what: "Container",
            name: name.into(),
        }
    }

    /// Creates a `NotRunning` error.
    pub fn not_running(name: impl Into<String>) -> Self {
        Self::NotRunning { name: name.into() }
    }

    /// Wraps a collaborator failure with the name of the failed operation.
    pub fn backend(op: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            op: op.into(),
            source: source.into(),
        }
    }

    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a validation error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true if this is a backend failure.
    #[allow(dead_code)] // Public API for callers
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Stable process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 3,
            Self::NotFound { .. } => 4,
            Self::NotRunning { .. } => 5,
            Self::AllocationExhausted { .. } => 6,
            Self::Backend { .. } => 7,
            Self::Config { .. } => 8,
        }
    }
}

/// Picks the exit code for an error that reached `main`.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CorralError>())
        .map_or(EXIT_UNCLASSIFIED, CorralError::exit_code)
}
