//! The standard `{status: "ok"|"error", ...}` response envelope every
//! handler returns, plus the error taxonomy HTTP handlers map into it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use hydrocarbon_common::HydrocarbonError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid X-Hydrocarbon-Key")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(#[from] HydrocarbonError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "status": "error", "error": self.to_string() }))).into_response()
    }
}

/// Wraps a handler's `Result` so success and failure both serialize
/// through the same envelope shape.
pub struct ApiResponse<T>(pub Result<T, ApiError>);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(data) => (StatusCode::OK, Json(json!({ "status": "ok", "data": data }))).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

impl<T, E: Into<ApiError>> From<Result<T, E>> for ApiResponse<T> {
    fn from(result: Result<T, E>) -> Self {
        ApiResponse(result.map_err(Into::into))
    }
}
