//! Upstream realtime connections.
//!
//! This module owns the WebSocket plumbing shared by both upstream backends:
//! the error type, the socket type and the connect routine. The OpenAI
//! Realtime wire protocol lives in [`openai`]; the native voice-agent
//! connector lives in `core::agent`.

pub mod openai;

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Upper bound on the upstream WebSocket handshake.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connected to an upstream provider.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors that can occur while talking to an upstream provider.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for upstream operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Build a client handshake request for `url` carrying an `Authorization` header.
pub fn authorized_request(url: &str, authorization: &str) -> RealtimeResult<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid upstream URL: {e}")))?;

    let value = HeaderValue::from_str(authorization).map_err(|e| {
        RealtimeError::InvalidConfiguration(format!("Invalid authorization header: {e}"))
    })?;
    request.headers_mut().insert("Authorization", value);

    Ok(request)
}

/// Perform the WebSocket handshake with an upstream provider.
pub async fn connect_upstream(request: Request) -> RealtimeResult<UpstreamSocket> {
    let uri = request.uri().clone();

    let connect = tokio_tungstenite::connect_async(request);
    let (socket, _response) = tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| RealtimeError::Timeout(format!("handshake with {uri}")))?
        .map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(response)
                if response.status() == 401 || response.status() == 403 =>
            {
                RealtimeError::AuthenticationFailed(format!(
                    "{} rejected credentials ({})",
                    uri,
                    response.status()
                ))
            }
            other => RealtimeError::ConnectionFailed(other.to_string()),
        })?;

    tracing::debug!(upstream = %uri, "Upstream WebSocket connected");
    Ok(socket)
}
