//! Agent WebSocket upgrade
//!
//! Selects the backend from the request path, resolves the correlation id
//! and hands the upgraded socket to the relay inside an `agent_connection`
//! span.

use axum::{
    Extension,
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{HeaderMap, Uri},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{Instrument, info};
use uuid::Uuid;

use crate::core::agent::BackendKind;
use crate::core::bridge::TRACE_ID_HEADER;
use crate::middleware::ClientIp;
use crate::state::{AppState, ConnectionGuard};

use super::relay;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Longest accepted caller-supplied trace id
const MAX_TRACE_ID_LEN: usize = 128;

#[derive(Debug, Default, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Trace id from the `x-trace-id` header, then the `trace_id` query
/// parameter, else a fresh UUID.
pub fn resolve_trace_id(headers: &HeaderMap, query: &AgentQuery) -> String {
    let from_header = headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    from_header
        .into_iter()
        .chain(query.trace_id.as_deref().map(str::trim))
        .find(|id| is_acceptable_trace_id(id))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn is_acceptable_trace_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TRACE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Agent WebSocket handler
///
/// Serves `/agent`, `/v1/agent/converse` (native pass-through) and
/// `/agent/realtime`, `/openai` (realtime bridge).
pub async fn agent_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<AgentQuery>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let backend = BackendKind::from_path(uri.path());
    let trace_id = resolve_trace_id(&headers, &query);

    info!(
        trace_id = %trace_id,
        backend = %backend,
        path = %uri.path(),
        "Agent WebSocket upgrade requested"
    );

    let guard = client_ip.map(|Extension(ClientIp(ip))| ConnectionGuard::new(state.clone(), ip));
    let span = tracing::info_span!("agent_connection", trace_id = %trace_id, backend = %backend);

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            async move {
                let _guard = guard;
                relay::run_connection(socket, state, backend, trace_id).await;
            }
            .instrument(span)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_trace_id_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("hdr-123"));
        let query = AgentQuery {
            trace_id: Some("query-456".to_string()),
        };
        assert_eq!(resolve_trace_id(&headers, &query), "hdr-123");
    }

    #[test]
    fn test_trace_id_from_query() {
        let query = AgentQuery {
            trace_id: Some("query-456".to_string()),
        };
        assert_eq!(resolve_trace_id(&HeaderMap::new(), &query), "query-456");
    }

    #[test]
    fn test_trace_id_generated() {
        let id = resolve_trace_id(&HeaderMap::new(), &AgentQuery::default());
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_trace_id_rejects_unsafe_values() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("bad id\twith spaces"));
        let query = AgentQuery {
            trace_id: Some("x".repeat(MAX_TRACE_ID_LEN + 1)),
        };
        let id = resolve_trace_id(&headers, &query);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
