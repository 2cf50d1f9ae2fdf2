use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wraps `attachvault_core::Error` so it can be returned directly from axum
/// handlers; maps to the `{success:false, error}` envelope (spec.md §7).
pub struct ApiError(pub attachvault_core::Error);

impl From<attachvault_core::Error> for ApiError {
    fn from(err: attachvault_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.0.public_message(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Wraps a successful payload in the `{success:true, data}` envelope.
pub fn envelope<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}
