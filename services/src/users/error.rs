//! API error type shared by the gate and the user handlers.
//!
//! Every failure leaves the service as a JSON `{error, message}` body. The
//! `error` field is a stable machine tag, `message` is safe to show to a
//! person. Raw storage and provider errors are logged where they occur and
//! translated here, never returned verbatim.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::gate::GateError;
use super::storage::UserStorageError;
use crate::identity::IdentityError;

/// Error response body for API endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No session, or the session is not bound to a local record.
    #[error("{0}")]
    Unauthenticated(String),

    /// The caller is authenticated but blocked.
    #[error("{0}")]
    Forbidden(String),

    /// The caller targeted themself and the policy forbids it.
    #[error("{0}")]
    SelfActionDenied(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::SelfActionDenied(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_tag(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthorized",
            ApiError::Forbidden(_) => "account_blocked",
            ApiError::SelfActionDenied(_) => "self_action_denied",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "user_already_exists",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn unauthenticated() -> Self {
        ApiError::Unauthenticated("Unauthorized".to_owned())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_tag().to_owned(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Turns a storage error into a message fit for an end user.
pub fn describe_storage_error(err: &UserStorageError) -> String {
    match err {
        UserStorageError::UserAlreadyExists(_) => "A user with this email already exists.".to_owned(),
        UserStorageError::UserNotFound(_) => "Record not found.".to_owned(),
        UserStorageError::ConnectionError(_) => {
            "Database connection error. Please try again later.".to_owned()
        }
        UserStorageError::PermissionDenied(_) => {
            "You do not have permission to perform this action.".to_owned()
        }
        UserStorageError::InvalidInput(msg) => msg.clone(),
        UserStorageError::StorageError(_) => {
            "An unexpected error occurred. Please try again.".to_owned()
        }
    }
}

impl From<UserStorageError> for ApiError {
    fn from(err: UserStorageError) -> Self {
        let message = describe_storage_error(&err);
        match err {
            UserStorageError::UserAlreadyExists(_) => ApiError::Conflict(message),
            UserStorageError::UserNotFound(_) => ApiError::NotFound(message),
            UserStorageError::InvalidInput(_) => ApiError::BadRequest(message),
            UserStorageError::StorageError(detail) => {
                tracing::error!("Unexpected storage error: {}", detail);
                ApiError::Internal(message)
            }
            UserStorageError::ConnectionError(_) | UserStorageError::PermissionDenied(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials => {
                ApiError::Unauthenticated("Invalid email or password".to_owned())
            }
            IdentityError::AlreadyRegistered(_) => {
                ApiError::Conflict("A user with this email already exists.".to_owned())
            }
            IdentityError::NotFound(_) => ApiError::NotFound("Record not found.".to_owned()),
            IdentityError::Rejected { status, message } if (400..500).contains(&status) => {
                ApiError::BadRequest(message)
            }
            IdentityError::Rejected { .. }
            | IdentityError::Transport(_)
            | IdentityError::InvalidResponse(_) => ApiError::Internal(
                "Authentication service error. Please try again later.".to_owned(),
            ),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NoSession | GateError::NoLocalRecord => ApiError::unauthenticated(),
            GateError::Blocked => ApiError::Forbidden(
                "Your account has been deactivated. Please contact support.".to_owned(),
            ),
            GateError::Store(e) => e.into(),
            GateError::Provider(e) => e.into(),
        }
    }
}
