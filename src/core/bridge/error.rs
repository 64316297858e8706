use thiserror::Error;

use super::response_state::ResponseProducer;
use crate::core::agent::AgentOutgoingMessage;

/// Errors raised by the bridge core. None of them closes the connection.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Client sent a `Settings` message that cannot be translated
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Client answered a function call that was never issued
    #[error("Unknown function call id: {0}")]
    UnknownFunctionCall(String),

    /// A response was requested while another one is active
    #[error("Response already in flight (held by {0})")]
    ResponseInFlight(ResponseProducer),

    /// External function-call handler failed
    #[error("Function call handler failed: {0}")]
    Handler(String),

    /// Upstream reported a concurrent-response conflict
    #[error("Upstream rejected concurrent response: {0}")]
    UpstreamConflict(String),

    /// Upstream reported any other error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Client message could not be parsed or exceeds size limits
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl BridgeError {
    /// Stable client-visible error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSettings(_) => "INVALID_SETTINGS",
            Self::UnknownFunctionCall(_) => "UNKNOWN_FUNCTION_CALL",
            Self::ResponseInFlight(_) => "RESPONSE_IN_FLIGHT",
            Self::Handler(_) => "FUNCTION_CALL_FAILED",
            Self::UpstreamConflict(_) => "UPSTREAM_CONFLICT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
        }
    }

    pub fn to_client_message(&self) -> AgentOutgoingMessage {
        AgentOutgoingMessage::error(self.code(), self.to_string())
    }
}
