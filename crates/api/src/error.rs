use arttic_core::error::CoreError;
use arttic_worker::{JobError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Store(StoreError::Invalid(core)) => classify_core_error(core),
            AppError::Store(StoreError::NotFound(name)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Image '{name}' not found"),
            ),
            AppError::Store(err) => {
                tracing::error!(error = %err, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
    }
}

/// Machine-readable code for a failed job, carried in WebSocket `error`
/// replies next to the message.
pub fn job_error_code(err: &JobError) -> &'static str {
    match err {
        JobError::Pipeline(e) => e.code(),
        JobError::Core(e) | JobError::Store(StoreError::Invalid(e)) => core_error_code(e),
        JobError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
        JobError::Store(_) => "STORAGE_ERROR",
        JobError::ExecutorGone => "UNAVAILABLE",
        JobError::Panicked(_) => "INTERNAL_ERROR",
    }
}

pub fn core_error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::NotFound { .. } => "NOT_FOUND",
        CoreError::Validation(_) => "VALIDATION_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use arttic_pipeline::PipelineError;

    use super::*;

    #[test]
    fn job_errors_map_to_codes() {
        assert_eq!(job_error_code(&PipelineError::NotLoaded.into()), "NOT_LOADED");
        assert_eq!(
            job_error_code(&CoreError::Validation("x".into()).into()),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            job_error_code(&JobError::Store(StoreError::NotFound("a.png".into()))),
            "NOT_FOUND"
        );
        assert_eq!(job_error_code(&JobError::ExecutorGone), "UNAVAILABLE");
        assert_eq!(job_error_code(&JobError::Panicked("boom".into())), "INTERNAL_ERROR");
    }

    #[test]
    fn validation_error_is_bad_request() {
        let response = AppError::Core(CoreError::Validation("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::Store(StoreError::NotFound("x.png".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
