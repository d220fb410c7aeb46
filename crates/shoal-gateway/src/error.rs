use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use shoal_config::ConfigError;
use shoal_pool::PoolError;

/// Gateway errors with their HTTP classification.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No app matches the request path (404).
    #[error("no app for {name:?}")]
    AppNotFound { name: String },

    /// The app's manifest is broken (500).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Anything the pool reports, classified per variant.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Response assembly failed (500).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::AppNotFound { name } => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "app not found", "app": name })))
                    .into_response()
            }
            ApiError::Config(e) => {
                tracing::error!(error = %e, "app configuration failed to load");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "invalid app configuration" })),
                )
                    .into_response()
            }
            ApiError::Pool(PoolError::Timeout { timeout_ms }) => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": "timeout", "timeoutMs": timeout_ms })),
            )
                .into_response(),
            // The size gate responds with an empty body.
            ApiError::Pool(PoolError::BodyTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE.into_response()
            }
            ApiError::Pool(PoolError::Spawn { message }) => {
                tracing::error!(error = %message, "worker spawn failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "worker spawn failed" })),
                )
                    .into_response()
            }
            ApiError::Pool(PoolError::Closed) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "shutting down" })),
            )
                .into_response(),
            ApiError::Pool(PoolError::Handler { message }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::Pool(PoolError::Critical { message }) => {
                tracing::error!(error = %message, "worker failed mid-request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "worker failed" })),
                )
                    .into_response()
            }
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "internal gateway error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}
