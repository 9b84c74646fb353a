use crate::error::IdPhotoError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Handler error; implements `IntoResponse` so handlers can return `Result<T, ApiError>`
#[derive(Debug)]
pub struct ApiError(IdPhotoError);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IdPhotoError::Input(_) | IdPhotoError::Geometry(_) => StatusCode::BAD_REQUEST,
            IdPhotoError::AiUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IdPhotoError> for ApiError {
    fn from(error: IdPhotoError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(IdPhotoError::input(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.0 {
            IdPhotoError::Input(msg) | IdPhotoError::Geometry(msg) => {
                tracing::debug!(error = %msg, "Rejected request");
                json!({ "ok": false, "error": msg })
            },
            IdPhotoError::AiUnavailable(msg) => {
                tracing::warn!(error = %msg, "AI matting unavailable");
                json!({ "ok": false, "error": "ai_unavailable", "mode": "ai_error" })
            },
            other => {
                tracing::error!(error = ?other, "Internal error");
                json!({ "ok": false, "error": "internal_error" })
            },
        };
        (status, Json(body)).into_response()
    }
}
