use application::{ApplicationError, AuthError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        ApiError::unauthorized(error.to_string())
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let code = error.code();
        let status = match &error {
            ApplicationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApplicationError::Forbidden | ApplicationError::Domain(DomainError::Forbidden) => {
                StatusCode::FORBIDDEN
            }
            ApplicationError::NotFound => StatusCode::NOT_FOUND,
            ApplicationError::InvalidEvent(_)
            | ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApplicationError::Persistence(_)
            | ApplicationError::Attachment(_)
            | ApplicationError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %error, "request failed");
        }
        ApiError::new(status, code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_errors_map_to_http_status() {
        let cases = [
            (ApplicationError::Forbidden, StatusCode::FORBIDDEN),
            (ApplicationError::NotFound, StatusCode::NOT_FOUND),
            (
                ApplicationError::Authentication(AuthError::Expired),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApplicationError::invalid_event("bad json"),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::Domain(DomainError::invalid_argument("text", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::Persistence("db down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }
}
