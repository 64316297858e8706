//! OpenAI Realtime API module.
//!
//! The bridge speaks the GA Realtime protocol upstream: it configures the
//! session once with `session.update`, streams input audio with
//! `input_audio_buffer.append`/`commit`, adds text and function results with
//! `conversation.item.create`, and starts responses with `response.create`.
//!
//! # Supported Models
//!
//! - `gpt-realtime` (default)
//! - `gpt-realtime-mini`
//! - `gpt-4o-realtime-preview`
//! - `gpt-4o-mini-realtime-preview`
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse, marin, cedar
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, or G.711 u-law / a-law at 8kHz.

mod client;
mod config;
mod messages;

pub use client::{OpenAIRealtimeConnector, decode_event, encode_event};
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{
    ACTIVE_RESPONSE_ERROR_CODE, ApiError, AudioConfig, AudioFormat, AudioInputConfig,
    AudioOutputConfig, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription,
    ResponseInfo, ResponseRequest, ServerEvent, SessionConfig, ToolDef,
};
