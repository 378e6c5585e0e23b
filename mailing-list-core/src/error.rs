use thiserror::Error;

/// Taxonomy of errors that can cross a component boundary in the mailing-list
/// control plane. Every storage, provider, and bus error is wrapped into one
/// of these at its origin so that transport-specific error types never leak
/// upward into the orchestration layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// True for failures worth retrying with backoff (§5, §4.2 Phase C).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Unexpected(format!("marshalling failure: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
