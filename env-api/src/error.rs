use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use env_orchestrator::OrchestratorError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            OrchestratorError::InvalidInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            OrchestratorError::Forbidden(msg) => ApiError::Forbidden(msg),
            OrchestratorError::Conflict(msg) => ApiError::Conflict(msg),
            _ => {
                tracing::error!("Internal error: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_errors_map_to_distinct_statuses() {
        let cases = [
            (OrchestratorError::NotFound("Session x".into()), StatusCode::NOT_FOUND),
            (OrchestratorError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (OrchestratorError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (OrchestratorError::Forbidden("stale".into()), StatusCode::FORBIDDEN),
            (OrchestratorError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                OrchestratorError::InvalidState("odd".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_not_found_message() {
        let err = ApiError::from(OrchestratorError::NotFound("Environment e1".into()));
        assert_eq!(err.to_string(), "Environment e1 not found");
    }
}
