//! REST API types

use crate::error::{AppError, ErrorResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard API response format
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success_with_message(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            code: None,
            message: Some(message.to_string()),
            data: None,
        }
    }

    pub fn success_with_data(data: T) -> Self {
        Self {
            status: "success".to_string(),
            code: None,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: Some(code.to_string()),
            message: Some(message.to_string()),
            data: None,
        }
    }
}

/// Empty data payload
#[derive(Debug, Clone, Serialize)]
pub struct Empty {}

/// Query for `GET /api/v1/snapshots/:symbol`
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub limit: Option<usize>,
}

/// Query for `GET /api/v1/stream`
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub symbol: Option<String>,
    pub mode: Option<String>,
    pub topic: Option<String>,
}

/// Result of a symbol reload
#[derive(Debug, Serialize)]
pub struct ReloadResult {
    pub active_symbols: usize,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }

        let body = ErrorResponse::from(&self);
        (
            status,
            Json(ApiResponse::<Empty>::error(&body.code, &body.message)),
        )
            .into_response()
    }
}
