//! Shared error taxonomy used by every `kbot-*` crate.
//!
//! Individual crates may layer their own `thiserror` enums on top of
//! [`CoreError`] for concerns that are genuinely local (e.g. framing protocol
//! codes), but anything that names a code shared across component
//! boundaries — validation, not-found, locking — lives here so the wire
//! error shape stays consistent end to end.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already acknowledged")]
    AlreadyAcknowledged,

    #[error("invalid session reference: {0}")]
    InvalidSessionRef(String),

    #[error("failed to acquire lock at {path}: {reason}")]
    LockFailed { path: String, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("failed to acquire index lock at {path}")]
    IndexLockFailed { path: String },

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("missing transformer for platform: {0}")]
    MissingTransformer(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Machine-readable code, stable across releases. Used both for
    /// internal matching and for the wire-level error shape.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "VALIDATION_ERROR",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::AlreadyAcknowledged => "ALREADY_ACKNOWLEDGED",
            CoreError::InvalidSessionRef(_) => "INVALID_SESSION_REF",
            CoreError::LockFailed { .. } => "LOCK_FAILED",
            CoreError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CoreError::IndexLockFailed { .. } => "INDEX_LOCK_FAILED",
            CoreError::UnknownAgent(_) => "UNKNOWN_AGENT",
            CoreError::MissingTransformer(_) => "MISSING_TRANSFORMER",
            CoreError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Yaml(_) => "SERIALIZATION_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Wire-level `{code, message, data?}` shape shared by JSON-RPC errors and
/// supervisor IPC error messages.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<&CoreError> for ErrorShape {
    fn from(err: &CoreError) -> Self {
        ErrorShape {
            code: err.code().to_string(),
            message: err.to_string(),
            data: None,
        }
    }
}
