//! Agent WebSocket route configuration
//!
//! # Endpoints
//!
//! - `GET /agent`, `GET /v1/agent/converse` - native agent pass-through
//! - `GET /agent/realtime`, `GET /openai` - OpenAI Realtime bridge
//!
//! Clients speak the voice-agent protocol on every endpoint: JSON control
//! messages (`Settings`, `InjectUserMessage`, `FunctionCallResponse`,
//! `KeepAlive`) and binary audio frames.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::agent_handler;
use crate::state::AppState;

pub fn create_agent_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agent", get(agent_handler))
        .route("/agent/realtime", get(agent_handler))
        .route("/v1/agent/converse", get(agent_handler))
        .route("/openai", get(agent_handler))
        .layer(TraceLayer::new_for_http())
}
