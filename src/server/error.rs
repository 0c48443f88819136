//! HTTP error type.
//!
//! Bodies are fixed strings per variant. Paths, tokens and internal error
//! details never reach the client; they are logged instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Auth,

    #[error("host not allowed")]
    HostValidation,

    #[error("path not allowed")]
    PathTraversal,

    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::HostValidation | Self::PathTraversal => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::NotFound(_) => Self::NotFound,
            crate::Error::InvalidInput(msg) => Self::Validation(msg),
            crate::Error::PathTraversal => Self::PathTraversal,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal error".to_string()
            }
            Self::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::HostValidation.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::PathTraversal.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_errors_map_without_leaking_paths() {
        let err: ApiError = crate::Error::store_io(
            PathBuf::from("/data/adb/keyward/secret"),
            std::io::Error::other("disk"),
        )
        .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: ApiError = crate::Error::NotFound("target.txt".into()).into();
        assert!(matches!(err, ApiError::NotFound));
        assert_eq!(err.to_string(), "not found");
    }
}
