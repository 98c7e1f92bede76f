//! Error handling module
//!
//! Provides the engine-wide error type. Expected domain conditions (a
//! tampered migration, a held lock, a failed statement) are returned as
//! typed variants; collaborators map `ErrorKind` to exit codes or HTTP codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[source] tokio_postgres::Error),

    #[error("Checksum mismatch for migration {version}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        version: u64,
        expected: String,
        actual: String,
    },

    #[error("Migration {version} has no down operations and cannot be rolled back")]
    NoRollbackAvailable { version: u64 },

    #[error("Timed out after {waited:?} waiting for the migration lock")]
    LockTimeout { waited: Duration },

    #[error("Monitor cycle exceeded its {elapsed:?} budget")]
    TickTimeout { elapsed: Duration },

    #[error("Migration {version} failed: {reason} ({count} migration(s) committed before it)", count = .applied.len())]
    PartialApplyFailure {
        version: u64,
        applied: Vec<u64>,
        reason: String,
    },

    #[error("Migration {version} is older than the latest applied migration {latest}")]
    OutOfOrder { version: u64, latest: u64 },

    #[error("Invalid status transition for migration {version}: {from} -> {to}")]
    InvalidTransition {
        version: u64,
        from: String,
        to: String,
    },

    #[error("Statement failed: {0}")]
    Execution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, serializable key for each error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionError,
    DatabaseError,
    ChecksumMismatch,
    NoRollbackAvailable,
    LockTimeout,
    TickTimeout,
    PartialApplyFailure,
    OutOfOrder,
    InvalidTransition,
    ExecutionError,
    NotFound,
    Conflict,
    ValidationError,
    IoError,
    SerializationError,
    ConfigError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorKind::NoRollbackAvailable => "NO_ROLLBACK_AVAILABLE",
            ErrorKind::LockTimeout => "LOCK_TIMEOUT",
            ErrorKind::TickTimeout => "TICK_TIMEOUT",
            ErrorKind::PartialApplyFailure => "PARTIAL_APPLY_FAILURE",
            ErrorKind::OutOfOrder => "OUT_OF_ORDER",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::ExecutionError => "EXECUTION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::IoError => "IO_ERROR",
            ErrorKind::SerializationError => "SERIALIZATION_ERROR",
            ErrorKind::ConfigError => "CONFIG_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Connection(_) => ErrorKind::ConnectionError,
            EngineError::Database(_) => ErrorKind::DatabaseError,
            EngineError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            EngineError::NoRollbackAvailable { .. } => ErrorKind::NoRollbackAvailable,
            EngineError::LockTimeout { .. } => ErrorKind::LockTimeout,
            EngineError::TickTimeout { .. } => ErrorKind::TickTimeout,
            EngineError::PartialApplyFailure { .. } => ErrorKind::PartialApplyFailure,
            EngineError::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::Execution(_) => ErrorKind::ExecutionError,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::Io(_) => ErrorKind::IoError,
            EngineError::Serialization(_) => ErrorKind::SerializationError,
            EngineError::Config(_) => ErrorKind::ConfigError,
            EngineError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection(_) | EngineError::LockTimeout { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::LockTimeout { .. } => StatusCode::LOCKED,
            EngineError::TickTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::ChecksumMismatch { .. }
            | EngineError::NoRollbackAvailable { .. }
            | EngineError::OutOfOrder { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Database(_)
            | EngineError::PartialApplyFailure { .. }
            | EngineError::Io(_)
            | EngineError::Serialization(_)
            | EngineError::Config(_)
            | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio_postgres::Error> for EngineError {
    fn from(err: tokio_postgres::Error) -> Self {
        // A closed socket is a connectivity problem, not a statement failure
        if err.is_closed() {
            EngineError::Connection(err.to_string())
        } else {
            EngineError::Database(err)
        }
    }
}

impl From<deadpool_postgres::PoolError> for EngineError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        EngineError::Connection(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub retryable: bool,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        // Internal failures are logged in full and summarized to the client
        let (message, details) = if status.is_server_error() {
            error!("{:?}: {}", kind, self);
            ("The engine could not complete the request".to_string(), Some(self.to_string()))
        } else {
            (self.to_string(), None)
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(kind.as_str().to_string()),
            retryable: self.is_retryable(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> EngineError {
    EngineError::NotFound(msg.into())
}
