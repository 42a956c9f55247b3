//! Error types for the collaborator API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that
//! converts into a JSON response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Bodies
//! carry the player-facing message only; store details go to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use genforge_core::{ServiceError, ValidationError};
use genforge_db::{DbError, ForegroundClosed};
use tracing::error;

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The `x-player-id` header is missing or not a UUID.
    #[error("missing or invalid x-player-id header")]
    MissingPlayer,

    /// A gameplay operation failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The foreground loop is not accepting work (shutting down).
    #[error("foreground unavailable")]
    Unavailable(#[from] ForegroundClosed),
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        Self::Service(ServiceError::Store(error))
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingPlayer => StatusCode::UNAUTHORIZED,
            Self::Service(ServiceError::Validation(v)) => validation_status(v),
            Self::Service(ServiceError::Invariant(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Service(ServiceError::Store(_)) | Self::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::InvalidRequest(msg) => msg.clone(),
            Self::Service(e) => e.user_message(),
            Self::MissingPlayer | Self::Unavailable(_) => self.to_string(),
        }
    }
}

const fn validation_status(error: &ValidationError) -> StatusCode {
    match error {
        ValidationError::GeneratorNotFound(_)
        | ValidationError::UnknownGenerator(_)
        | ValidationError::NetworkNotFound(_) => StatusCode::NOT_FOUND,
        ValidationError::NotOwner | ValidationError::PermissionDenied { .. } => {
            StatusCode::FORBIDDEN
        }
        ValidationError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ValidationError::LocationOccupied(_)
        | ValidationError::CapExceeded { .. }
        | ValidationError::NotReady { .. }
        | ValidationError::NetworkFull { .. }
        | ValidationError::MaxLevel
        | ValidationError::MaxTier
        | ValidationError::SameOwner => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.message(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
