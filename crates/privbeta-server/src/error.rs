//! HTTP error types for the `privbeta` server.
//!
//! Maps domain errors from `privbeta-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use privbeta_core::error::{
    GateError, InvitationError, MailError, PasswordError, RepositoryError,
};

/// Application-level error returned from HTTP handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No signed-in user.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Signed in, but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Client sent invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Resource already exists (duplicate username, email, code).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Internal server error. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => Self::NotFound(err.to_string()),
            RepositoryError::Conflict { .. } | RepositoryError::Exhausted { .. } => {
                Self::Conflict(err.to_string())
            }
            RepositoryError::Backend { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<InvitationError> for AppError {
    fn from(err: InvitationError) -> Self {
        match err {
            InvitationError::EmailMismatch { .. }
            | InvitationError::MissingCode { .. }
            | InvitationError::Invalid { .. } => Self::BadRequest(err.to_string()),
            InvitationError::NoCodeAvailable { .. } => Self::NotFound(err.to_string()),
            InvitationError::Repository(inner) => inner.into(),
            InvitationError::Mail(inner) => inner.into(),
        }
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Address { .. } => Self::BadRequest(err.to_string()),
            MailError::Template { .. } | MailError::Build { .. } | MailError::Transport { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Repository(inner) => Self::Internal(inner.to_string()),
            GateError::Invitation(inner) => Self::Internal(inner.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        let (status, json) = body(AppError::Internal("db password=hunter2".to_owned())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "internal server error");
    }

    #[tokio::test]
    async fn repository_errors_map_to_status() {
        let err: AppError = RepositoryError::Conflict {
            entity: "user",
            reason: "username taken".to_owned(),
        }
        .into();
        let (status, json) = body(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "conflict");

        let err: AppError = InvitationError::NoCodeAvailable {
            user_id: uuid::Uuid::nil(),
        }
        .into();
        let (status, _) = body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
