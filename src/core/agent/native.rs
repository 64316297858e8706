//! Native voice-agent upstream connector.
//!
//! The native backend is a straight pass-through: frames are relayed
//! unchanged, so this module only knows how to open the socket.

use zeroize::Zeroizing;

use crate::core::realtime::{
    RealtimeError, RealtimeResult, UpstreamSocket, authorized_request, connect_upstream,
};

/// Default native agent endpoint.
pub const NATIVE_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// Opens upstream sockets to the native voice-agent API.
#[derive(Clone)]
pub struct NativeAgentConnector {
    url: String,
    api_key: Zeroizing<String>,
}

impl std::fmt::Debug for NativeAgentConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAgentConnector")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl NativeAgentConnector {
    pub fn new(url: Option<&str>, api_key: &str) -> RealtimeResult<Self> {
        if api_key.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "Deepgram API key is required for the native agent backend".to_string(),
            ));
        }

        Ok(Self {
            url: url.unwrap_or(NATIVE_AGENT_URL).to_string(),
            api_key: Zeroizing::new(api_key.to_string()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connect(&self) -> RealtimeResult<UpstreamSocket> {
        let request = authorized_request(&self.url, &format!("Token {}", self.api_key.as_str()))?;
        let socket = connect_upstream(request).await?;
        tracing::info!(upstream = %self.url, "Connected to native agent API");
        Ok(socket)
    }
}
