//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `agent` - Agent WebSocket (native pass-through or realtime bridge)

pub mod agent;
pub mod api;

pub use agent::agent_handler;
