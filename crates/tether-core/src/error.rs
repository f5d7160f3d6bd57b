//! Error types for the replication engine

use thiserror::Error;

use crate::ListKind;

/// Core Tether errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TetherError {
    // Path errors
    #[error("Invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Unknown root: {0}")]
    UnknownRoot(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    // Structural errors
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Invalid list index \"{index}\" in {path}")]
    InvalidIndex { path: String, index: String },

    #[error("List kind of {0} is not known yet")]
    KindUnknown(String),

    #[error("List kind mismatch at {path}: fixed as {fixed}, got {requested}")]
    KindMismatch {
        path: String,
        fixed: ListKind,
        requested: ListKind,
    },

    #[error("A key is required to append to {0}")]
    KeyRequired(String),

    #[error("A value is required to append to {0}")]
    ValueRequired(String),

    #[error("Duplicate key \"{key}\" in {path}")]
    DuplicateKey { path: String, key: String },

    #[error("Type mismatch at {path}: {reason}")]
    TypeMismatch { path: String, reason: String },

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    // Runtime errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Runtime stopped")]
    RuntimeStopped,
}

impl TetherError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TetherError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(path: impl ToString, reason: impl Into<String>) -> Self {
        TetherError::TypeMismatch {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for Tether operations
pub type TetherResult<T> = Result<T, TetherError>;
