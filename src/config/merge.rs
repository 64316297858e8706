use std::path::PathBuf;

use crate::core::bridge::SettingsPolicy;
use crate::core::realtime::openai::OpenAIRealtimeModel;

use super::ServerConfig;
use super::env::{from_env, parse_voice};
use super::utils::{env_var, parse_env_bool};
use super::validation::resolve_tls;
use super::yaml::YamlConfig;

/// Merge YAML configuration over the environment-derived base.
///
/// YAML values take precedence; anything YAML leaves out keeps its
/// environment (or default) value.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            let enabled = match tls.enabled {
                Some(enabled) => enabled,
                None => parse_env_bool("TLS_ENABLED")?.unwrap_or(false),
            };
            config.tls = resolve_tls(
                enabled,
                tls.cert_path
                    .or_else(|| env_var("TLS_CERT_PATH"))
                    .map(PathBuf::from),
                tls.key_path
                    .or_else(|| env_var("TLS_KEY_PATH"))
                    .map(PathBuf::from),
            )?;
        }
    }

    if let Some(providers) = yaml.providers {
        if providers.openai_api_key.is_some() {
            config.openai_api_key = providers.openai_api_key;
        }
        if providers.deepgram_api_key.is_some() {
            config.deepgram_api_key = providers.deepgram_api_key;
        }
    }

    if let Some(upstream) = yaml.upstream {
        if let Some(url) = upstream.native_agent_url {
            config.native_agent_url = url;
        }
        if let Some(url) = upstream.realtime_url {
            config.realtime_url = url;
        }
        if let Some(model) = upstream.realtime_model {
            config.realtime_model = OpenAIRealtimeModel::from_str_or_default(&model);
        }
        if let Some(voice) = upstream.realtime_voice {
            config.realtime_voice = parse_voice(&voice)?;
        }
    }

    if let Some(bridge) = yaml.bridge {
        if bridge.function_call_url.is_some() {
            config.function_call_url = bridge.function_call_url;
        }
        if let Some(timeout) = bridge.function_call_timeout_ms {
            config.function_call_timeout_ms = timeout;
        }
        if let Some(policy) = bridge.settings_policy {
            config.settings_policy = policy
                .parse::<SettingsPolicy>()
                .map_err(|e| format!("Invalid bridge.settings_policy: {e}"))?;
        }
        if let Some(audio) = bridge.audio {
            if let Some(value) = audio.max_buffer_ms {
                config.audio.max_buffer_ms = value;
            }
            if let Some(value) = audio.silence_ms {
                config.audio.silence_ms = value;
            }
            if let Some(value) = audio.silence_threshold {
                config.audio.silence_threshold = value;
            }
            if let Some(value) = audio.min_commit_ms {
                config.audio.min_commit_ms = value;
            }
        }
    }

    if let Some(level) = yaml.logging.and_then(|logging| logging.level) {
        config.log_level = level;
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if let Some(value) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = value;
        }
        if let Some(value) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = value;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(value) = security.max_connections_per_ip {
            config.max_connections_per_ip = value;
        }
    }

    Ok(config)
}
