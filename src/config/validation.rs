use std::path::PathBuf;

use url::Url;

use crate::core::bridge::AudioCommitConfig;

use super::TlsConfig;

/// Resolve TLS settings; enabling TLS requires both paths.
pub(super) fn resolve_tls(
    enabled: bool,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    if !enabled {
        return Ok(None);
    }
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig {
            cert_path,
            key_path,
        })),
        (None, _) => Err("TLS is enabled but TLS_CERT_PATH is not set".into()),
        (_, None) => Err("TLS is enabled but TLS_KEY_PATH is not set".into()),
    }
}

/// Upstream endpoints are WebSocket URLs.
pub(super) fn validate_upstream_url(
    name: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(format!("{name} must use ws:// or wss://, got '{}'", url.scheme()).into());
    }
    Ok(())
}

/// The function-call handler must be an absolute http(s) URL with a host.
pub(super) fn validate_function_call_url(
    value: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(value) = value else {
        return Ok(());
    };
    let url = Url::parse(value)
        .map_err(|e| format!("FUNCTION_CALL_URL '{value}' is not an absolute URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("FUNCTION_CALL_URL must use http:// or https://: '{value}'").into());
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("FUNCTION_CALL_URL has no host: '{value}'").into());
    }
    Ok(())
}

pub(super) fn validate_timeouts(
    function_call_timeout_ms: u64,
    audio: &AudioCommitConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if function_call_timeout_ms == 0 {
        return Err("FUNCTION_CALL_TIMEOUT_MS must be greater than zero".into());
    }
    if audio.max_buffer_ms == 0 {
        return Err("AUDIO_MAX_BUFFER_MS must be greater than zero".into());
    }
    if audio.silence_ms == 0 {
        return Err("AUDIO_SILENCE_MS must be greater than zero".into());
    }
    if !audio.silence_threshold.is_finite() || audio.silence_threshold < 0.0 {
        return Err("AUDIO_SILENCE_THRESHOLD must be a non-negative number".into());
    }
    Ok(())
}

/// The governor layer rejects zero-valued quotas at startup.
pub(super) fn validate_rate_limit(
    requests_per_second: u32,
    burst_size: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than zero".into());
    }
    if burst_size == 0 {
        return Err("RATE_LIMIT_BURST_SIZE must be greater than zero".into());
    }
    Ok(())
}
