use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use kumas_types::api::ErrorBody;

pub const NO_MATCH: &str = "There is no matching information.";
pub const INVALID_REQUEST: &str = "The request is invalid.";
pub const INVALID_TOKEN: &str = "Invalid or Missing JWT token.";

/// Every failure a service can report. Storage errors end up in `Internal`
/// and are never shown to the client verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Referenced user, chat, membership or message is absent
    #[error("{0}")]
    NotFound(String),

    /// Authenticated but not entitled to this resource or action
    #[error("{0}")]
    Forbidden(String),

    /// Invalid input or a duplicate (email, friend edge)
    #[error("{0}")]
    BadRequest(String),

    /// Missing, malformed or expired token
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found() -> Self {
        Self::NotFound(NO_MATCH.to_string())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden(INVALID_REQUEST.to_string())
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized(INVALID_TOKEN.to_string())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Translate a store error: constraint violations become `on_violation`,
    /// anything else is internal.
    pub fn from_store(err: anyhow::Error, on_violation: impl FnOnce() -> ApiError) -> Self {
        if kumas_db::is_constraint_violation(&err) {
            warn!("constraint violation translated: {}", err);
            on_violation()
        } else {
            Self::Internal(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::Forbidden(_) => "ForbiddenError",
            Self::BadRequest(_) => "BadRequestError",
            Self::Unauthorized(_) => "UnauthorizedError",
            Self::Internal(_) => "InternalServerError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!("internal error: {:#}", e);
                "Server Error".to_string()
            }
            other => {
                warn!("{} {}: {}", status.as_u16(), other.name(), other);
                other.to_string()
            }
        };

        let body = ErrorBody {
            success: false,
            code: status.as_u16(),
            name: self.name().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::forbidden().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(anyhow::anyhow!("disk on fire")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_is_not_leaked() {
        let response = ApiError::from(anyhow::anyhow!("SELECT secret FROM users")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_from_store_passes_through_non_constraint_errors() {
        let err = ApiError::from_store(anyhow::anyhow!("io"), ApiError::forbidden);
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
