use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::engine::{CONFLICT_MESSAGE, EngineError};

/// Every failure the HTTP surface can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Detail is logged and audited, never sent to the caller.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Unexpected(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Unexpected(detail) = &self {
            tracing::error!("request failed: {detail}");
        }
        let body = json!({
            "error": self.public_message(),
            "status": status.as_u16()
        });
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::Validation(msg),
            EngineError::LimitExceeded(what) => ApiError::Validation(what.to_string()),
            EngineError::NotFound(id) => ApiError::NotFound(format!("not found: {id}")),
            EngineError::Conflict(_) => ApiError::Conflict(CONFLICT_MESSAGE.into()),
            e @ (EngineError::DuplicateClient(_) | EngineError::HasAppointments(_)) => {
                ApiError::Conflict(e.to_string())
            }
            EngineError::Wal(msg) => ApiError::Unexpected(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing | AuthError::Invalid => ApiError::Unauthorized(err.to_string()),
            AuthError::Upstream(_) | AuthError::Config(_) => ApiError::Unexpected(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::validation("bad"), StatusCode::BAD_REQUEST),
            (EngineError::LimitExceeded("title too long"), StatusCode::BAD_REQUEST),
            (EngineError::NotFound(Ulid::nil()), StatusCode::NOT_FOUND),
            (EngineError::Conflict(Ulid::nil()), StatusCode::CONFLICT),
            (EngineError::DuplicateClient(Ulid::nil()), StatusCode::CONFLICT),
            (EngineError::Wal("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn conflict_uses_user_facing_message() {
        let err = ApiError::from(EngineError::Conflict(Ulid::new()));
        assert_eq!(err.public_message(), CONFLICT_MESSAGE);
    }

    #[test]
    fn unexpected_detail_stays_internal() {
        let err = ApiError::from(EngineError::Wal("fsync: EIO".into()));
        assert_eq!(err.public_message(), "internal server error");
        assert!(err.to_string().contains("fsync"));
    }

    #[test]
    fn auth_errors_split_between_401_and_500() {
        assert_eq!(ApiError::from(AuthError::Invalid).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(AuthError::Missing).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(AuthError::Upstream("timeout".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
