use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Flat error taxonomy for the platform (spec.md §7). Kept as one enum
/// rather than a class hierarchy per the "deep class hierarchies" redesign
/// flag — every HTTP-facing service maps it to a status code the same way.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream returned an incomplete schema: {0}")]
    UpstreamSchema(String),

    #[error("transient kv failure: {0}")]
    TransientKv(String),

    #[error("no suitable assets found for the given conditions")]
    NoSuitableAssets,

    #[error("llm provider rate limited")]
    LlmRateLimited,

    #[error("llm provider timed out")]
    LlmTimeout,

    #[error("llm output could not be parsed: {0}")]
    LlmOutputMalformed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UpstreamUnavailable(msg) => {
                tracing::error!(error = %msg, "upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream service unavailable".to_string(),
                )
            }
            AppError::UpstreamSchema(msg) => {
                tracing::error!(error = %msg, "upstream schema error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::TransientKv(msg) => {
                // Never expected to surface: callers treat TransientKv as a
                // miss. If it does reach here it is a programming error.
                tracing::error!(error = %msg, "transient kv failure escaped to http boundary");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::NoSuitableAssets => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "no suitable assets found for the given conditions".to_string(),
            ),
            AppError::LlmRateLimited | AppError::LlmTimeout => {
                tracing::error!(error = %self, "llm provider failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::LlmOutputMalformed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("llm output malformed: {msg}"),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorBody { detail })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
