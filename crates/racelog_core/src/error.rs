//! Core error types for racelog.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A frame or patch could not be decoded into snapshot terms
    #[error("Decode error: {reason}")]
    Decode {
        /// What was malformed
        reason: String,
    },

    /// Frame type code is neither full nor delta
    #[error("Unknown frame type: {0}")]
    UnknownFrameKind(u8),

    /// Archive call failed
    #[error("Archive error for source {source_id}: {reason}")]
    Archive {
        /// Source event being fetched
        source_id: i64,
        /// Failure reported by the archive
        reason: String,
    },

    /// Publish sink call failed
    #[error("Sink error during {operation}: {reason}")]
    Sink {
        /// register, publish or unregister
        operation: String,
        /// Failure reported by the sink
        reason: String,
    },

    /// Nothing left to replay after filtering
    #[error("No eligible source events among {total} candidates")]
    NoEligibleEvents {
        /// Number of events considered
        total: usize,
    },

    /// Configuration rejected
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Offending option
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Version string could not be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Serialization failure
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for a decode failure
    #[must_use]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Shorthand for a sink failure
    #[must_use]
    pub fn sink(operation: &str, reason: impl Into<String>) -> Self {
        Self::Sink {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a remote collaborator rather than the data itself
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Archive { .. } | Self::Sink { .. } | Self::Io(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
