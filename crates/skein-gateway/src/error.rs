//! Gateway error responses.
//!
//! Every error renders the `{"success": false, "message": ...}` envelope the
//! platform's clients expect. Upstream failure detail is redacted to a
//! category string; the full error is logged gateway-side only.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No configured route matches the request path.
    #[error("no route for request path")]
    RouteNotFound,

    /// Missing, malformed, expired or forged credential.
    #[error("access denied")]
    AccessDenied,

    /// The client exhausted a rate budget.
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// The upstream call failed. Carries a category, never upstream detail.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::RouteNotFound => {
                let body = json!({"success": false, "message": "Not found."});
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
            Self::AccessDenied => {
                let body = json!({"success": false, "message": "Access denied."});
                (StatusCode::UNAUTHORIZED, Json(body)).into_response()
            }
            Self::RateLimited { retry_after } => {
                let body = json!({
                    "success": false,
                    "message": "Too many requests, please try again later."
                });
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("retry-after", retry_after.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            Self::Upstream(category) => {
                let body = json!({
                    "success": false,
                    "message": "Internal server error",
                    "error": category
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            Self::Internal(category) => {
                let body = json!({
                    "success": false,
                    "message": "Internal server error",
                    "error": category
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
