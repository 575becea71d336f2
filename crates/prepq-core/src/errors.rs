//! Error types for the prepared-query substitution cache.

use crate::models::Value;

/// Top-level error enum for the prepq core library.
#[derive(Debug, thiserror::Error)]
pub enum PrepqError {
    /// A proxy's value was branched on or revealed outside a permitted window.
    #[error("Unsafe proxy access for '{key}': {reason}")]
    UnsafeProxyAccess { key: String, reason: String },

    /// A value of an unsupported shape was handed to the proxy layer.
    #[error("Invalid proxy input for '{key}': {reason}")]
    InvalidProxyInput { key: String, reason: String },

    #[error("Command mapping failed:\n{expected}\n{actual}")]
    CommandMappingFailed { expected: String, actual: String },

    #[error("Parameter mapping failed for {command}:\n{expected:?}\n{actual:?}")]
    ParameterMappingFailed {
        command: String,
        expected: Vec<Value>,
        actual: Vec<Value>,
    },

    #[error("Key not found in value context: {0}")]
    KeyNotFound(String),

    #[error("Placeholder mismatch: command has {placeholders} placeholders, got {params} parameters")]
    PlaceholderMismatch { placeholders: usize, params: usize },

    #[error("Builder error: {0}")]
    Builder(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrepqError {
    pub(crate) fn unsafe_access(key: &str, reason: impl Into<String>) -> Self {
        PrepqError::UnsafeProxyAccess {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_input(key: &str, reason: impl Into<String>) -> Self {
        PrepqError::InvalidProxyInput {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the wrapped builder does something the
    /// substitution scheme cannot support. These always propagate.
    pub fn is_integration_bug(&self) -> bool {
        matches!(
            self,
            PrepqError::UnsafeProxyAccess { .. } | PrepqError::InvalidProxyInput { .. }
        )
    }

    /// True for the two equivalence-check failures.
    pub fn is_mapping_failure(&self) -> bool {
        matches!(
            self,
            PrepqError::CommandMappingFailed { .. } | PrepqError::ParameterMappingFailed { .. }
        )
    }
}

pub type PrepqResult<T> = Result<T, PrepqError>;
