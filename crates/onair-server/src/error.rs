use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use onair_shared::CoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    RateLimited,
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Core(CoreError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Core(CoreError::InvalidArgument(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Core(CoreError::NotFound(_)) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Core(CoreError::InvalidState(_)) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ServerError::Core(CoreError::Unavailable(detail)) => {
                tracing::error!(error = %detail, "Store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::Core(CoreError::Unauthorized), StatusCode::UNAUTHORIZED),
            (
                ServerError::Core(CoreError::invalid("hour is required")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::Core(CoreError::not_found("slot 3")),
                StatusCode::NOT_FOUND,
            ),
            (
                ServerError::Core(CoreError::invalid_state("timer is not running")),
                StatusCode::CONFLICT,
            ),
            (
                ServerError::Core(CoreError::Unavailable("timed out".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ServerError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
