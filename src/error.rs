//! Application error types

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Typed failure returned by a source adapter.
///
/// Adapters convert every upstream problem into one of these so the resolver
/// can record it against the source's health and move on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("symbol not supported by this source: {0}")]
    SymbolNotSupported(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("request queue for {0} is closed")]
    QueueClosed(String),

    #[error("request to {0} aborted by a panic")]
    Aborted(String),
}

impl SourceError {
    /// Whether this failure should trigger a background re-authentication
    pub fn is_auth(&self) -> bool {
        matches!(self, SourceError::Auth(_))
    }

    /// The source does not cover this request at all; says nothing about
    /// whether the upstream is up
    pub fn is_capability_miss(&self) -> bool {
        matches!(
            self,
            SourceError::SymbolNotSupported(_) | SourceError::Unsupported(_)
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(0)
        } else if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

/// Serializable error response for API callers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Keychain(_) => "KEYCHAIN_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Source(_) => "SOURCE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
