//! Connection limits for agent WebSocket upgrades
//!
//! Enforces the global WebSocket cap and the per-IP cap before the upgrade
//! handler runs. Plain HTTP requests pass through untouched.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header::UPGRADE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client IP carried to the handler, which owns the slot from then on.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Reserve a connection slot for WebSocket upgrades.
///
/// Returns 503 when the global limit is reached and 429 when the per-IP
/// limit is reached. If the handler does not switch protocols, the slot is
/// released here; otherwise the handler's connection guard releases it.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            let response = next.run(request).await;
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                state.release_connection(client_ip);
            }
            response
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, extract::connect_info::MockConnectInfo, routing::get};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/agent", get(|| async { "plain" }))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
            .layer(MockConnectInfo(SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))))
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/agent")
            .header(UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_plain_request_passes_through() {
        let state = AppState::new(ServerConfig::default());
        let response = app(state.clone())
            .oneshot(Request::builder().uri("/agent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_slot_released_when_upgrade_not_performed() {
        let state = AppState::new(ServerConfig::default());
        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_when_at_capacity() {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = Some(1);
        let state = AppState::new(config);
        state
            .try_acquire_connection(Ipv4Addr::new(10, 0, 0, 1).into())
            .unwrap();

        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_rejects_per_ip() {
        let mut config = ServerConfig::default();
        config.max_connections_per_ip = 1;
        let state = AppState::new(config);
        state.try_acquire_connection(Ipv4Addr::LOCALHOST.into()).unwrap();

        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.ws_connection_count(), 1);
    }
}
