//! Settings translator.
//!
//! Converts the client's one-time `Settings` message into a GA
//! `session.update` and decides whether it may be sent now.

use serde::{Deserialize, Serialize};

use super::error::BridgeError;
use crate::core::agent::AgentSettings;
use crate::core::agent::messages::FunctionDefinition;
use crate::core::realtime::openai::{
    AudioConfig, AudioFormat, AudioInputConfig, AudioOutputConfig, ClientEvent,
    DEFAULT_TRANSCRIPTION_MODEL, InputAudioTranscription, OPENAI_REALTIME_SAMPLE_RATE,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, SessionConfig, ToolDef,
};

/// Transcription models the upstream accepts.
const OPENAI_TRANSCRIPTION_MODELS: &[&str] =
    &["whisper-1", "gpt-4o-transcribe", "gpt-4o-mini-transcribe"];

/// What to do with the first `Settings` when it arrives during an active response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SettingsPolicy {
    /// Acknowledge, never forward
    #[default]
    #[serde(rename = "acknowledge", alias = "acknowledge_without_forwarding")]
    AcknowledgeWithoutForwarding,
    /// Acknowledge now, forward at the next idle transition
    #[serde(rename = "defer", alias = "defer_until_idle")]
    DeferUntilIdle,
}

impl SettingsPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcknowledgeWithoutForwarding => "acknowledge",
            Self::DeferUntilIdle => "defer",
        }
    }
}

impl std::str::FromStr for SettingsPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "acknowledge" | "acknowledge_without_forwarding" => {
                Ok(Self::AcknowledgeWithoutForwarding)
            }
            "defer" | "defer_until_idle" => Ok(Self::DeferUntilIdle),
            other => Err(format!(
                "Unknown settings policy '{other}' (expected 'acknowledge' or 'defer')"
            )),
        }
    }
}

impl std::fmt::Display for SettingsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of translating a client `Settings` message.
#[derive(Debug, Clone)]
pub struct TranslatedSettings {
    pub session: SessionConfig,
    pub greeting: Option<String>,
    pub input_format: OpenAIRealtimeAudioFormat,
}

impl TranslatedSettings {
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: self.session.clone(),
        }
    }
}

/// Parse the raw `Settings` body.
pub fn parse_settings(
    raw: serde_json::Map<String, serde_json::Value>,
) -> Result<AgentSettings, BridgeError> {
    if !raw.get("agent").is_some_and(serde_json::Value::is_object) {
        return Err(BridgeError::InvalidSettings(
            "Settings must contain an 'agent' object".to_string(),
        ));
    }

    let settings: AgentSettings = serde_json::from_value(serde_json::Value::Object(raw))
        .map_err(|e| BridgeError::InvalidSettings(e.to_string()))?;
    settings
        .validate_size()
        .map_err(|e| BridgeError::InvalidSettings(e.to_string()))?;
    Ok(settings)
}

/// Translate parsed settings into the upstream session configuration.
pub fn translate_settings(
    settings: &AgentSettings,
    default_voice: OpenAIRealtimeVoice,
) -> TranslatedSettings {
    let agent = &settings.agent;
    let think = agent.think.as_ref();

    let input_encoding = settings
        .audio
        .as_ref()
        .and_then(|audio| audio.input.as_ref());
    let output_encoding = settings
        .audio
        .as_ref()
        .and_then(|audio| audio.output.as_ref());

    let input_format = input_encoding
        .and_then(|input| input.encoding.as_deref())
        .map(OpenAIRealtimeAudioFormat::from_encoding)
        .unwrap_or_default();
    let output_format = output_encoding
        .and_then(|output| output.encoding.as_deref())
        .map(OpenAIRealtimeAudioFormat::from_encoding)
        .unwrap_or(input_format);

    if input_format == OpenAIRealtimeAudioFormat::Pcm16
        && let Some(rate) = input_encoding.and_then(|input| input.sample_rate)
        && rate != OPENAI_REALTIME_SAMPLE_RATE
    {
        tracing::warn!(
            sample_rate = rate,
            expected = OPENAI_REALTIME_SAMPLE_RATE,
            "Client linear16 sample rate differs from upstream rate; audio is not resampled"
        );
    }

    let transcription_model = agent
        .listen
        .as_ref()
        .and_then(|listen| listen.provider.as_ref())
        .and_then(|provider| provider.model.as_deref())
        .filter(|model| OPENAI_TRANSCRIPTION_MODELS.contains(model))
        .unwrap_or(DEFAULT_TRANSCRIPTION_MODEL);

    let voice = agent
        .speak
        .as_ref()
        .and_then(|speak| speak.primary())
        .and_then(|speak| speak.provider.as_ref())
        .and_then(|provider| {
            provider
                .voice
                .as_deref()
                .and_then(OpenAIRealtimeVoice::parse)
                .or_else(|| provider.model.as_deref().and_then(OpenAIRealtimeVoice::parse))
        })
        .unwrap_or(default_voice);

    let tools: Option<Vec<ToolDef>> = think
        .and_then(|think| think.functions.as_ref())
        .filter(|functions| !functions.is_empty())
        .map(|functions| functions.iter().map(tool_from_function).collect());

    let session = SessionConfig {
        instructions: think.and_then(|think| think.prompt.clone()),
        output_modalities: Some(vec!["audio".to_string()]),
        audio: Some(AudioConfig {
            input: Some(AudioInputConfig {
                format: Some(AudioFormat::from(input_format)),
                transcription: Some(InputAudioTranscription {
                    model: transcription_model.to_string(),
                }),
                turn_detection: None,
            }),
            output: Some(AudioOutputConfig {
                format: Some(AudioFormat::from(output_format)),
                voice: Some(voice.as_str().to_string()),
            }),
        }),
        tool_choice: tools.as_ref().map(|_| "auto".to_string()),
        tools,
        ..Default::default()
    };

    TranslatedSettings {
        session,
        greeting: agent.greeting.clone().filter(|g| !g.trim().is_empty()),
        input_format,
    }
}

fn tool_from_function(function: &FunctionDefinition) -> ToolDef {
    ToolDef {
        tool_type: "function".to_string(),
        name: function.name.clone(),
        description: function.description.clone(),
        parameters: function.parameters.clone(),
    }
}

/// Decision for one client `Settings` message.
#[derive(Debug, Clone)]
pub enum SettingsOutcome {
    /// Send the session update now
    Forward(TranslatedSettings),
    /// First settings arrived while active; acknowledged and dropped
    Suppressed {
        input_format: OpenAIRealtimeAudioFormat,
    },
    /// First settings arrived while active; held for the next idle transition
    Deferred {
        input_format: OpenAIRealtimeAudioFormat,
    },
    /// Settings were already handled for this connection
    Duplicate,
}

/// Per-connection settings state.
#[derive(Debug)]
pub struct SettingsTranslator {
    policy: SettingsPolicy,
    default_voice: OpenAIRealtimeVoice,
    has_forwarded_session_update: bool,
    held: Option<TranslatedSettings>,
}

impl SettingsTranslator {
    pub fn new(policy: SettingsPolicy, default_voice: OpenAIRealtimeVoice) -> Self {
        Self {
            policy,
            default_voice,
            has_forwarded_session_update: false,
            held: None,
        }
    }

    pub fn policy(&self) -> SettingsPolicy {
        self.policy
    }

    /// Whether the first settings have been handled (forwarded, suppressed or deferred).
    pub fn has_forwarded_session_update(&self) -> bool {
        self.has_forwarded_session_update
    }

    pub fn has_held_update(&self) -> bool {
        self.held.is_some()
    }

    /// Handle one client `Settings` message given the current response state.
    pub fn on_settings(
        &mut self,
        raw: serde_json::Map<String, serde_json::Value>,
        response_idle: bool,
    ) -> Result<SettingsOutcome, BridgeError> {
        if self.has_forwarded_session_update {
            tracing::debug!("Duplicate Settings acknowledged without forwarding");
            return Ok(SettingsOutcome::Duplicate);
        }

        let settings = parse_settings(raw)?;
        let translated = translate_settings(&settings, self.default_voice);
        self.has_forwarded_session_update = true;

        if response_idle {
            tracing::info!("Forwarding session.update");
            return Ok(SettingsOutcome::Forward(translated));
        }

        let input_format = translated.input_format;
        match self.policy {
            SettingsPolicy::AcknowledgeWithoutForwarding => {
                tracing::info!(
                    "Settings arrived during an active response; acknowledged without forwarding"
                );
                Ok(SettingsOutcome::Suppressed { input_format })
            }
            SettingsPolicy::DeferUntilIdle => {
                tracing::info!("Settings arrived during an active response; deferred until idle");
                self.held = Some(translated);
                Ok(SettingsOutcome::Deferred { input_format })
            }
        }
    }

    /// Take the held session update, if any.
    pub fn take_held(&mut self) -> Option<TranslatedSettings> {
        self.held.take()
    }
}
