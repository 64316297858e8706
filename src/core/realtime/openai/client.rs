//! OpenAI Realtime API connector.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events (GA event names)
//! - Auth: `Authorization: Bearer <key>`

use tokio_tungstenite::tungstenite::Message;
use zeroize::Zeroizing;

use super::config::{OPENAI_REALTIME_URL, OpenAIRealtimeModel};
use super::messages::{ClientEvent, ServerEvent};
use crate::core::realtime::{
    RealtimeError, RealtimeResult, UpstreamSocket, authorized_request, connect_upstream,
};

/// Opens upstream sockets to the OpenAI Realtime API.
#[derive(Clone)]
pub struct OpenAIRealtimeConnector {
    base_url: String,
    api_key: Zeroizing<String>,
    model: OpenAIRealtimeModel,
}

impl std::fmt::Debug for OpenAIRealtimeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIRealtimeConnector")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAIRealtimeConnector {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        model: OpenAIRealtimeModel,
    ) -> RealtimeResult<Self> {
        if api_key.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "OpenAI API key is required for the realtime bridge".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.unwrap_or(OPENAI_REALTIME_URL).to_string(),
            api_key: Zeroizing::new(api_key.to_string()),
            model,
        })
    }

    pub fn model(&self) -> OpenAIRealtimeModel {
        self.model
    }

    /// Build the WebSocket URL with the model query parameter.
    pub fn build_ws_url(&self) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.base_url, separator, self.model.as_str())
    }

    pub async fn connect(&self) -> RealtimeResult<UpstreamSocket> {
        let request = authorized_request(
            &self.build_ws_url(),
            &format!("Bearer {}", self.api_key.as_str()),
        )?;
        let socket = connect_upstream(request).await?;
        tracing::info!(model = %self.model, "Connected to OpenAI Realtime API");
        Ok(socket)
    }
}

/// Encode a client event as a WebSocket text frame.
pub fn encode_event(event: &ClientEvent) -> RealtimeResult<Message> {
    serde_json::to_string(event)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| RealtimeError::SerializationError(e.to_string()))
}

/// Decode a server event from a WebSocket text payload.
pub fn decode_event(text: &str) -> RealtimeResult<ServerEvent> {
    serde_json::from_str(text).map_err(|e| RealtimeError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let connector =
            OpenAIRealtimeConnector::new(None, "sk-test", OpenAIRealtimeModel::GptRealtimeMini)
                .expect("connector");
        assert_eq!(
            connector.build_ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-realtime-mini"
        );
    }

    #[test]
    fn test_build_ws_url_with_existing_query() {
        let connector = OpenAIRealtimeConnector::new(
            Some("ws://127.0.0.1:9000/realtime?region=eu"),
            "sk-test",
            OpenAIRealtimeModel::GptRealtime,
        )
        .expect("connector");
        assert_eq!(
            connector.build_ws_url(),
            "ws://127.0.0.1:9000/realtime?region=eu&model=gpt-realtime"
        );
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = OpenAIRealtimeConnector::new(None, "", OpenAIRealtimeModel::GptRealtime);
        assert!(matches!(result, Err(RealtimeError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let connector =
            OpenAIRealtimeConnector::new(None, "sk-secret", OpenAIRealtimeModel::GptRealtime)
                .expect("connector");
        let debug = format!("{connector:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_encode_and_decode() {
        let message = encode_event(&ClientEvent::InputAudioBufferCommit).expect("encode");
        assert_eq!(
            message,
            Message::Text(r#"{"type":"input_audio_buffer.commit"}"#.into())
        );

        let event = decode_event(r#"{"type":"response.created","response":{"id":"resp_1"}}"#)
            .expect("decode");
        assert!(matches!(event, ServerEvent::ResponseCreated { .. }));
        assert!(decode_event("{not json").is_err());
    }
}
