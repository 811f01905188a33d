use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use orgdir_core::engine::{EngineError, InvariantError};
use orgdir_storage::{BindError, StorageError};

/// The broad failure classes a caller can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Invariant,
    Unauthenticated,
    Denied,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("authentication required")]
    Unauthenticated,

    #[error("access denied")]
    Denied,

    #[error("service temporarily unavailable")]
    Unavailable(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("internal server error")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Invariant(_) => ErrorClass::Invariant,
            Self::Unauthenticated => ErrorClass::Unauthenticated,
            Self::Denied => ErrorClass::Denied,
            Self::Unavailable(_) | Self::DeadlineExceeded | Self::Internal(_) => {
                ErrorClass::Infrastructure
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Invariant(e) => e.code(),
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Denied => "ACCESS_DENIED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Invariant(_) => StatusCode::CONFLICT,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Denied => StatusCode::FORBIDDEN,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Invariant(e) => Self::Invariant(e),
            EngineError::NotFound { kind, id } => {
                tracing::debug!(kind, id, "target not visible, reporting denial");
                Self::Denied
            }
            EngineError::UnknownUser(id) => {
                tracing::debug!(user_id = %id, "unknown user");
                Self::Unauthenticated
            }
            EngineError::DisabledUser(id) => {
                tracing::debug!(user_id = %id, "disabled user");
                Self::Unauthenticated
            }
            EngineError::ScopeViolation => {
                tracing::debug!("write outside the caller's scope, reporting denial");
                Self::Denied
            }
            EngineError::Unavailable(msg) => Self::Unavailable(msg),
            EngineError::Id(e) => Self::Internal(e.to_string()),
            EngineError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateRoot => Self::Invariant(InvariantError::DuplicateRoot),
            StorageError::Duplicate { kind, key } => {
                Self::Invariant(InvariantError::Duplicate { kind, key })
            }
            StorageError::ScopeViolation => Self::Denied,
            StorageError::Unavailable(msg) => Self::Unavailable(msg),
            StorageError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<BindError> for ApiError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Identity(e) => Self::Validation(e.to_string()),
            BindError::Storage(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Unavailable(detail) | Self::Internal(detail) => {
                tracing::error!(code = self.code(), error = %detail, "request failed");
            }
            Self::DeadlineExceeded => tracing::error!("request deadline exceeded"),
            Self::Denied => tracing::warn!("request denied"),
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}
