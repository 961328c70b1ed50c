//! JSON error envelope for API responses.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use armory_shared::ArmoryError;

/// Any failure surfaced by a handler.
#[derive(Debug)]
pub struct ApiError(pub ArmoryError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ArmoryError::Validation { .. } => StatusCode::BAD_REQUEST,
            ArmoryError::NotFound(_) => StatusCode::NOT_FOUND,
            ArmoryError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ArmoryError::Conflict(_) => StatusCode::CONFLICT,
            ArmoryError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ArmoryError> for ApiError {
    fn from(err: ArmoryError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ArmoryError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(ArmoryError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.0.code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
