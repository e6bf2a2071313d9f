//! Error types for fedigate.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// The ingestion layer uses `NotFound`, `AlreadyExists` and
/// `ResolutionFailed` for conditions that callers absorb locally; the
/// remaining variants describe collaborator or configuration failures.
#[derive(Debug, Error)]
pub enum AppError {
    // === Ingestion ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    // === Input ===
    #[error("Bad request: {0}")]
    BadRequest(String),

    // === Collaborators ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Federation error: {0}")]
    Federation(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns a stable error code for logs.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::ResolutionFailed(_) => "RESOLUTION_FAILED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Federation(_) => "FEDERATION_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is one of the locally absorbed ingestion conditions.
    #[must_use]
    pub const fn is_absorbable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::ResolutionFailed(_)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::BadRequest(format!("Invalid URL: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
