//! OpenAI Realtime API WebSocket message types.
//!
//! This module defines the client and server event types for the OpenAI Realtime API
//! (GA event names). All events are JSON-encoded and sent over WebSocket.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - input_audio_buffer.clear - Clear audio buffer
//! - conversation.item.create - Add item to conversation
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.committed
//! - conversation.item.added / conversation.item.done
//! - conversation.item.input_audio_transcription.completed
//! - response.created / response.done
//! - response.output_item.done
//! - response.output_text.done
//! - response.output_audio.delta / response.output_audio.done
//! - response.output_audio_transcript.done
//! - error
//!
//! Beta event names (`response.text.done`, `response.audio.done`, ...) are
//! accepted as aliases of their GA counterparts.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::OpenAIRealtimeAudioFormat;

/// Error code the upstream uses when a second response is requested while one is active.
pub const ACTIVE_RESPONSE_ERROR_CODE: &str = "conversation_already_has_active_response";

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for OpenAI Realtime API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session type (always "realtime" for speech-to-speech)
    #[serde(rename = "type")]
    pub session_type: String,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Output modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<Vec<String>>,

    /// Audio input/output configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_type: "realtime".to_string(),
            instructions: None,
            output_modalities: None,
            audio: None,
            tools: None,
            tool_choice: None,
        }
    }
}

/// Audio section of the session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioOutputConfig>,
}

/// Input audio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioInputConfig {
    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<InputAudioTranscription>,

    /// Turn detection. Always serialized: `null` disables server-side turn
    /// detection so the upstream never starts a response on its own.
    #[serde(default)]
    pub turn_detection: Option<serde_json::Value>,
}

/// Output audio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Audio format descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AudioFormat {
    /// PCM 16-bit little-endian
    #[serde(rename = "audio/pcm")]
    Pcm {
        /// Sample rate (only 24000 is accepted upstream)
        rate: u32,
    },
    /// G.711 u-law
    #[serde(rename = "audio/pcmu")]
    Pcmu {},
    /// G.711 a-law
    #[serde(rename = "audio/pcma")]
    Pcma {},
}

impl From<OpenAIRealtimeAudioFormat> for AudioFormat {
    fn from(format: OpenAIRealtimeAudioFormat) -> Self {
        match format {
            OpenAIRealtimeAudioFormat::Pcm16 => AudioFormat::Pcm {
                rate: format.sample_rate(),
            },
            OpenAIRealtimeAudioFormat::G711Ulaw => AudioFormat::Pcmu {},
            OpenAIRealtimeAudioFormat::G711Alaw => AudioFormat::Pcma {},
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// User text message with a caller-chosen item id.
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart::text("input_text", text)]),
            ..Default::default()
        }
    }

    /// Assistant text message (used for greetings).
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("assistant".to_string()),
            content: Some(vec![ContentPart::text("output_text", text)]),
            ..Default::default()
        }
    }

    /// Result of a function call.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, output_text, output_audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    fn text(content_type: &str, text: impl Into<String>) -> Self {
        Self {
            content_type: content_type.to_string(),
            text: Some(text.into()),
            transcript: None,
        }
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Body of a `response.create` event.
///
/// Only the response gate in `core::bridge` can construct one, which makes the
/// gate the single code path that starts upstream responses. The event id is
/// echoed back by upstream `error` events so a rejected request can be matched.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    event_id: String,
}

impl ResponseRequest {
    pub(in crate::core) fn granted(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseRequest),

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name of the event, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate(_) => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }

    /// Whether sending this event starts an upstream response.
    #[inline]
    pub fn starts_response(&self) -> bool {
        matches!(self, ClientEvent::ResponseCreate(_))
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: serde_json::Value,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: serde_json::Value,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Conversation item added
    #[serde(rename = "conversation.item.added", alias = "conversation.item.created")]
    ConversationItemAdded {
        /// Added item
        item: ConversationItem,
    },

    /// Conversation item finished
    #[serde(rename = "conversation.item.done")]
    ConversationItemDone {
        /// Finished item
        item: ConversationItem,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        transcript: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: ResponseInfo,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: ResponseInfo,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: Option<String>,
        /// Item
        item: ConversationItem,
    },

    /// Text output done
    #[serde(rename = "response.output_text.done", alias = "response.text.done")]
    OutputTextDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        /// Full text
        #[serde(default)]
        text: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    OutputAudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio output done
    #[serde(rename = "response.output_audio.done", alias = "response.audio.done")]
    OutputAudioDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio transcript done
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    OutputAudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },

    /// Any event the bridge does not act on
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Decode base64 audio from an audio delta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl ApiError {
    /// The upstream rejected a response request because one is already active.
    pub fn is_active_response_conflict(&self) -> bool {
        self.code.as_deref() == Some(ACTIVE_RESPONSE_ERROR_CODE)
            || self.message.contains("already has an active response")
    }
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    pub id: String,
    /// Response status (completed, cancelled, failed, incomplete)
    #[serde(default)]
    pub status: Option<String>,
}
