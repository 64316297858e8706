//! Agent WebSocket endpoint
//!
//! - `handler`: upgrade, backend selection and trace id resolution
//! - `relay`: native pass-through and the realtime bridge event loop

mod handler;
mod relay;

pub use handler::{AgentQuery, agent_handler, resolve_trace_id};
