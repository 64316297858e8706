use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Health check: `GET /` returns `OK`.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
