//! # Error Taxonomy
//!
//! Every failure that can surface to a connected client maps onto one of
//! seven wire kinds. Handlers wrap their work so that anything uncaught
//! degrades to `internal_error` without tearing the socket down; the
//! write-behind worker and the pub/sub listener never surface errors to
//! clients at all.

use crate::model::Rev;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Offending payload field
    pub field: String,
    /// Human-readable explanation
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A failure surfaced to a client, tagged with its wire kind.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bearer token missing, malformed, or expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The user's role does not allow the attempted action
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Structural validation of the inbound payload failed
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// The referenced list or item does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The client's revision is behind the authoritative state
    #[error("revision conflict: current rev is {current}")]
    RevisionConflict {
        /// Authoritative revision at rejection time
        current: Rev,
    },

    /// A store timed out or hiccuped; the client should retry
    #[error("transient error: {0}")]
    Transient(String),

    /// Anything uncaught; details stay server-side
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The wire `kind` string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Auth(_) => "auth_error",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::RevisionConflict { .. } => "revision_conflict",
            EngineError::Transient(_) => "transient_error",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// The message shown to the client. Internal errors are masked; their
    /// detail is logged server-side only.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::Internal(_) => "internal error".to_string(),
            EngineError::Validation(fields) => fields
                .iter()
                .map(|f| format!("{}: {}", f.field, f.message))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            EngineError::Transient(format!("shared store timeout: {}", err))
        } else {
            EngineError::Transient(format!("shared store error: {}", err))
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                EngineError::Transient("durable store pool timed out".to_string())
            }
            other => EngineError::Internal(format!("durable store error: {}", other)),
        }
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        EngineError::Transient("shared store operation timed out".to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("serialization error: {}", err))
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
