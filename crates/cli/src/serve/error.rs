//! Mapping from engine failures to HTTP error responses.
//!
//! Every error body has the shape `{"error": CODE, "message": text}`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docflow_engine::{EngineError, ErrorKind, HarnessError};

use super::json_error;

const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug)]
pub(crate) enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                json_error(status, code, INTERNAL_MESSAGE).into_response()
            }
            ApiError::Validation(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => {
                json_error(status, code, msg).into_response()
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::Validation(msg),
            EngineError::NotFound(_) => ApiError::NotFound(err.to_string()),
            EngineError::Transition(e) => match e.kind() {
                ErrorKind::NotFound => ApiError::NotFound(e.to_string()),
                ErrorKind::InvalidTransition
                | ErrorKind::VersionConflict
                | ErrorKind::RegistryViolation => ApiError::Conflict(e.to_string()),
                ErrorKind::Unexpected => ApiError::Internal(e.to_string()),
            },
            EngineError::Harness(
                e @ (HarnessError::NoWorkers | HarnessError::LimitExceeded { .. }),
            ) => ApiError::Validation(e.to_string()),
            EngineError::Harness(e) => ApiError::Internal(e.to_string()),
            EngineError::Storage(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
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
    use docflow_engine::TransitionError;
    use docflow_storage::{DocumentAction, DocumentId, DocumentStatus, StorageError};

    fn status_of(err: EngineError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn engine_errors_map_to_status_codes() {
        let id = DocumentId::new();
        assert_eq!(
            status_of(EngineError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(EngineError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(TransitionError::NotFound { document_id: id }.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                TransitionError::InvalidTransition {
                    document_id: id,
                    current: DocumentStatus::Approved,
                    action: DocumentAction::Approve,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(
                TransitionError::VersionConflict {
                    document_id: id,
                    expected_version: 1,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(TransitionError::RegistryViolation { document_id: id }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(HarnessError::NoWorkers.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                HarnessError::LimitExceeded {
                    field: "worker count",
                    value: usize::MAX,
                    limit: 256,
                }
                .into()
            ),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::Backend("disk on fire".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
