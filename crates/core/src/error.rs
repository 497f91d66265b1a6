//! Error types for Telvault.

use std::fmt;

use thiserror::Error;

use crate::types::SignalType;

/// Result type alias using Telvault's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Object storage operation that produced a [`Error::Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Put,
    Get,
    List,
    Delete,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
            StorageOp::List => "list",
            StorageOp::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// Core error type for Telvault.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Capture session already active: {session_id}")]
    SessionAlreadyActive { session_id: String },

    #[error("Capture session already exists and is finished: {session_id}")]
    SessionAlreadyExists { session_id: String },

    #[error("Capture session not found or not active: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Capture session not completed: {session_id}")]
    SessionNotCompleted { session_id: String },

    #[error("Signal {signal_type} disabled for session {session_id}")]
    SignalDisabled {
        session_id: String,
        signal_type: SignalType,
    },

    // =========================================================================
    // Storage / Codec Errors
    // =========================================================================
    #[error("Storage {op} failed for '{key}': {cause}")]
    Storage {
        op: StorageOp,
        key: String,
        cause: String,
    },

    #[error("Compression error: {cause}")]
    Compression { cause: String },

    // =========================================================================
    // Replay Errors
    // =========================================================================
    #[error("Replay of session {session_id} failed: {cause}")]
    Replay { session_id: String, cause: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error.
    pub fn storage(op: StorageOp, key: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Storage {
            op,
            key: key.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a compression error.
    pub fn compression(cause: impl fmt::Display) -> Self {
        Self::Compression {
            cause: cause.to_string(),
        }
    }

    /// Create a replay error.
    pub fn replay(session_id: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Replay {
            session_id: session_id.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a session-not-found error.
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
