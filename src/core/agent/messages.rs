//! Voice-agent WebSocket message types
//!
//! This module defines the client-facing wire protocol. Clients send a
//! one-time `Settings` message, binary audio frames, injected text and
//! function-call results; the server answers with acknowledgments,
//! conversation text, function-call requests and errors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum allowed size for the agent prompt (100 KB)
pub const MAX_PROMPT_SIZE: usize = 100 * 1024;

/// Maximum allowed size for injected text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for function result (100 KB)
pub const MAX_FUNCTION_RESULT_SIZE: usize = 100 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentIncomingMessage {
    /// One-time session configuration. Kept as raw JSON so that malformed
    /// settings can be rejected with a specific error.
    Settings(serde_json::Map<String, serde_json::Value>),

    /// Inject a user text turn
    InjectUserMessage {
        /// Text content
        content: String,
    },

    /// Result of a function call
    FunctionCallResponse {
        /// Function call ID
        id: String,
        /// Function name
        #[serde(default)]
        name: Option<String>,
        /// Result content
        #[serde(default, alias = "result")]
        content: Option<serde_json::Value>,
        /// Error reported by the client instead of a result
        #[serde(default)]
        error: Option<String>,
    },

    /// Connection keep-alive
    KeepAlive,

    /// Any other message type
    #[serde(other)]
    Unknown,
}

impl AgentIncomingMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Settings(_) => "Settings",
            Self::InjectUserMessage { .. } => "InjectUserMessage",
            Self::FunctionCallResponse { .. } => "FunctionCallResponse",
            Self::KeepAlive => "KeepAlive",
            Self::Unknown => "Unknown",
        }
    }
}

/// Settings body, parsed from the raw `Settings` message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub audio: Option<AudioSettings>,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AudioSettings {
    #[serde(default)]
    pub input: Option<AudioEncodingSettings>,
    #[serde(default)]
    pub output: Option<AudioEncodingSettings>,
}

/// Audio encoding declared by the client.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AudioEncodingSettings {
    /// `linear16`, `mulaw` or `alaw`
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// Agent behavior configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub listen: Option<ListenConfig>,
    #[serde(default)]
    pub think: Option<ThinkConfig>,
    #[serde(default)]
    pub speak: Option<SpeakSettings>,
    /// Opening line spoken by the agent
    #[serde(default)]
    pub greeting: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ThinkConfig {
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    /// System prompt
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub functions: Option<Vec<FunctionDefinition>>,
}

/// `speak` is either a single provider or an ordered fallback list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SpeakSettings {
    Single(SpeakConfig),
    Fallbacks(Vec<SpeakConfig>),
}

impl SpeakSettings {
    pub fn primary(&self) -> Option<&SpeakConfig> {
        match self {
            Self::Single(config) => Some(config),
            Self::Fallbacks(list) => list.first(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SpeakConfig {
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

/// Vendor provider block (`{ "type": "...", "model": "...", "voice": "..." }`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Function definition for tool calling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum AgentOutgoingMessage {
    /// Upstream connected
    Welcome {
        /// Connection trace id
        request_id: String,
    },

    /// Settings acknowledged
    SettingsApplied,

    /// Text spoken or typed in the conversation
    ConversationText {
        /// `user` or `assistant`
        role: String,
        content: String,
    },

    /// Speech detected in the client's audio
    UserStartedSpeaking,

    /// Assistant finished sending audio for the current response
    AgentAudioDone,

    /// Function call requested by the model
    FunctionCallRequest { functions: Vec<FunctionCallInfo> },

    /// Error message
    Error { description: String, code: String },
}

impl AgentOutgoingMessage {
    pub fn conversation_text(role: &str, content: impl Into<String>) -> Self {
        Self::ConversationText {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn error(code: &str, description: impl Into<String>) -> Self {
        Self::Error {
            description: description.into(),
            code: code.to_string(),
        }
    }
}

/// One function call inside a `FunctionCallRequest`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionCallInfo {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
    /// Whether the client is expected to answer with `FunctionCallResponse`
    pub client_side: bool,
}

// =============================================================================
// Message Routing
// =============================================================================

/// Frames queued for the client writer task
#[derive(Debug)]
pub enum AgentMessageRoute {
    /// JSON text message
    Outgoing(AgentOutgoingMessage),
    /// Binary audio data
    Audio(Bytes),
    /// Close connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures
#[derive(Debug, Clone, Error)]
pub enum AgentValidationError {
    #[error("Prompt too large: {size} bytes (max: {max} bytes)")]
    PromptTooLarge { size: usize, max: usize },
    #[error("Text too large: {size} bytes (max: {max} bytes)")]
    TextTooLarge { size: usize, max: usize },
    #[error("Function result too large: {size} bytes (max: {max} bytes)")]
    FunctionResultTooLarge { size: usize, max: usize },
}

impl AgentIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), AgentValidationError> {
        match self {
            Self::InjectUserMessage { content } if content.len() > MAX_TEXT_SIZE => {
                Err(AgentValidationError::TextTooLarge {
                    size: content.len(),
                    max: MAX_TEXT_SIZE,
                })
            }
            Self::FunctionCallResponse {
                content: Some(content),
                ..
            } => {
                let size = match content {
                    serde_json::Value::String(s) => s.len(),
                    other => other.to_string().len(),
                };
                if size > MAX_FUNCTION_RESULT_SIZE {
                    return Err(AgentValidationError::FunctionResultTooLarge {
                        size,
                        max: MAX_FUNCTION_RESULT_SIZE,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl AgentSettings {
    pub fn validate_size(&self) -> Result<(), AgentValidationError> {
        let prompt_len = self
            .agent
            .think
            .as_ref()
            .and_then(|think| think.prompt.as_ref())
            .map_or(0, String::len);
        if prompt_len > MAX_PROMPT_SIZE {
            return Err(AgentValidationError::PromptTooLarge {
                size: prompt_len,
                max: MAX_PROMPT_SIZE,
            });
        }
        Ok(())
    }
}
