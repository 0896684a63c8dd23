//! Edge error type for the HTTP surface. Wraps [`spacesaver_core::CoreError`]
//! plus the encoder-specific failure modes and maps each variant to the
//! status codes in the environment table (§6), the way the teacher's
//! `errors::AppError` maps its own error enum at the edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use spacesaver_core::CoreError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("encoder failed: {0}")]
    Encode(String),

    #[error("encoded output rejected: {0}")]
    Acceptance(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Core(CoreError::Conflict(_)) => StatusCode::CONFLICT,
            ServerError::Core(CoreError::InvariantViolation(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Encode(_) | ServerError::Acceptance(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}
