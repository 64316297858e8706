//! Client-facing voice-agent protocol and the native upstream connector.

pub mod messages;
mod native;

pub use messages::{
    AgentIncomingMessage, AgentMessageRoute, AgentOutgoingMessage, AgentSettings,
    AgentValidationError, FunctionCallInfo,
};
pub use native::{NATIVE_AGENT_URL, NativeAgentConnector};

/// Which upstream a client connection is relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Frames relayed unchanged to the native agent API
    NativeAgent,
    /// Frames translated to and from the OpenAI Realtime API
    RealtimeBridge,
}

impl BackendKind {
    /// Select the backend from the request path: a last segment of
    /// `realtime` or `openai` selects the bridge.
    pub fn from_path(path: &str) -> Self {
        let last = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if last.eq_ignore_ascii_case("realtime") || last.eq_ignore_ascii_case("openai") {
            Self::RealtimeBridge
        } else {
            Self::NativeAgent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeAgent => "native",
            Self::RealtimeBridge => "realtime",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_path() {
        assert_eq!(BackendKind::from_path("/agent"), BackendKind::NativeAgent);
        assert_eq!(
            BackendKind::from_path("/v1/agent/converse"),
            BackendKind::NativeAgent
        );
        assert_eq!(
            BackendKind::from_path("/agent/realtime"),
            BackendKind::RealtimeBridge
        );
        assert_eq!(BackendKind::from_path("/openai/"), BackendKind::RealtimeBridge);
        assert_eq!(BackendKind::from_path(""), BackendKind::NativeAgent);
    }
}
