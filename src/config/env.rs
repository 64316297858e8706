use std::path::PathBuf;

use crate::core::bridge::SettingsPolicy;
use crate::core::realtime::openai::{OpenAIRealtimeModel, OpenAIRealtimeVoice};

use super::utils::{env_var, parse_env, parse_env_bool};
use super::validation::resolve_tls;
use super::ServerConfig;

/// Build a configuration from environment variables over defaults.
///
/// No cross-field validation happens here beyond TLS path resolution.
pub(super) fn from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_env::<u16>("PORT")? {
        config.port = port;
    }

    config.tls = resolve_tls(
        parse_env_bool("TLS_ENABLED")?.unwrap_or(false),
        env_var("TLS_CERT_PATH").map(PathBuf::from),
        env_var("TLS_KEY_PATH").map(PathBuf::from),
    )?;

    config.openai_api_key = env_var("OPENAI_API_KEY");
    config.deepgram_api_key = env_var("DEEPGRAM_API_KEY");

    if let Some(url) = env_var("NATIVE_AGENT_URL") {
        config.native_agent_url = url;
    }
    if let Some(url) = env_var("REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = env_var("REALTIME_MODEL") {
        config.realtime_model = OpenAIRealtimeModel::from_str_or_default(&model);
    }
    if let Some(voice) = env_var("REALTIME_VOICE") {
        config.realtime_voice = parse_voice(&voice)?;
    }

    config.function_call_url = env_var("FUNCTION_CALL_URL");
    if let Some(timeout) = parse_env::<u64>("FUNCTION_CALL_TIMEOUT_MS")? {
        config.function_call_timeout_ms = timeout;
    }
    if let Some(policy) = parse_env::<SettingsPolicy>("SETTINGS_POLICY")? {
        config.settings_policy = policy;
    }

    if let Some(value) = parse_env::<u64>("AUDIO_MAX_BUFFER_MS")? {
        config.audio.max_buffer_ms = value;
    }
    if let Some(value) = parse_env::<u64>("AUDIO_SILENCE_MS")? {
        config.audio.silence_ms = value;
    }
    if let Some(value) = parse_env::<f32>("AUDIO_SILENCE_THRESHOLD")? {
        config.audio.silence_threshold = value;
    }
    if let Some(value) = parse_env::<u64>("AUDIO_MIN_COMMIT_MS")? {
        config.audio.min_commit_ms = value;
    }

    if let Some(level) = env_var("LOG_LEVEL") {
        config.log_level = level;
    }

    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    if let Some(value) = parse_env::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = value;
    }
    if let Some(value) = parse_env::<u32>("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = value;
    }
    config.max_websocket_connections = parse_env::<usize>("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(value) = parse_env::<u32>("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = value;
    }

    Ok(config)
}

/// Configured voices must be real OpenAI voices; clients may still name others.
pub(super) fn parse_voice(value: &str) -> Result<OpenAIRealtimeVoice, Box<dyn std::error::Error>> {
    OpenAIRealtimeVoice::parse(value)
        .ok_or_else(|| format!("Invalid value for REALTIME_VOICE: '{value}'").into())
}
