use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_engine::EngineError;
use parley_media::MediaError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing or invalid session token")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Storage temporarily unavailable")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound => ServerError::NotFound("record not found".into()),
            EngineError::NotParticipant => {
                ServerError::Forbidden("not a participant of this conversation".into())
            }
            EngineError::UnknownSession => ServerError::Unauthorized,
            EngineError::Unavailable => ServerError::Unavailable,
            EngineError::InvalidEmail => ServerError::BadRequest("invalid email address".into()),
            EngineError::Store(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<MediaError> for ServerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::NotFound(path) => ServerError::NotFound(path),
            MediaError::InvalidPath(path) => {
                ServerError::BadRequest(format!("invalid media path: {path}"))
            }
            MediaError::TooLarge { .. } => ServerError::PayloadTooLarge,
            MediaError::UploadFailed(msg) => ServerError::Internal(msg),
            MediaError::Store(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
