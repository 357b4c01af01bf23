use thiserror::Error;

/// Core error types for REMS Intermediary domain operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unsupported hook: {0}")]
    UnsupportedHook(String),

    #[error("No medication found: {0}")]
    NoMedication(String),

    #[error("Invalid routing record: {0}")]
    InvalidRecord(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new UnsupportedHook error
    pub fn unsupported_hook(hook: impl Into<String>) -> Self {
        Self::UnsupportedHook(hook.into())
    }

    /// Create a new NoMedication error
    pub fn no_medication(reason: impl Into<String>) -> Self {
        Self::NoMedication(reason.into())
    }

    /// Create a new InvalidRecord error
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
