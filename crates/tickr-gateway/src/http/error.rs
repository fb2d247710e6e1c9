use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tickr_scheduler::SchedulerError;
use tracing::error;

/// Error body shared by every route: `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::Validation(_) | SchedulerError::InvalidSchedule(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::Conflict { .. } | SchedulerError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            SchedulerError::Database(_) | SchedulerError::Internal(_) => {
                error!("request failed: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
