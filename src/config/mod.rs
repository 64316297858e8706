//! Configuration module for the agent bridge server
//!
//! Handles server configuration from .env files, YAML files and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use agent_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::agent::NATIVE_AGENT_URL;
use crate::core::bridge::{AudioCommitConfig, BridgeConfig, SettingsPolicy};
use crate::core::realtime::openai::{OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_FUNCTION_CALL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND: u32 = 60;
pub const DEFAULT_RATE_LIMIT_BURST_SIZE: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Present when TLS is enabled
    pub tls: Option<TlsConfig>,

    // Provider credentials
    pub openai_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,

    // Upstream endpoints
    pub native_agent_url: String,
    pub realtime_url: String,
    pub realtime_model: OpenAIRealtimeModel,
    pub realtime_voice: OpenAIRealtimeVoice,

    // Bridge behavior
    /// External function-call handler; when unset, calls go to the client
    pub function_call_url: Option<String>,
    pub function_call_timeout_ms: u64,
    pub settings_policy: SettingsPolicy,
    pub audio: AudioCommitConfig,

    pub log_level: String,

    // Security
    /// CORS allowed origins (comma-separated or "*"). None means no browser access.
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    /// Global cap on concurrent WebSocket connections (None = unlimited)
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tls: None,
            openai_api_key: None,
            deepgram_api_key: None,
            native_agent_url: NATIVE_AGENT_URL.to_string(),
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            realtime_model: OpenAIRealtimeModel::default(),
            realtime_voice: OpenAIRealtimeVoice::default(),
            function_call_url: None,
            function_call_timeout_ms: DEFAULT_FUNCTION_CALL_TIMEOUT_MS,
            settings_policy: SettingsPolicy::default(),
            audio: AudioCommitConfig::default(),
            log_level: "info".to_string(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND,
            rate_limit_burst_size: DEFAULT_RATE_LIMIT_BURST_SIZE,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

/// Zeroize provider keys when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values (loaded in main.rs)
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_upstream_url("NATIVE_AGENT_URL", &self.native_agent_url)?;
        validation::validate_upstream_url("REALTIME_URL", &self.realtime_url)?;
        validation::validate_function_call_url(self.function_call_url.as_deref())?;
        validation::validate_timeouts(self.function_call_timeout_ms, &self.audio)?;
        validation::validate_rate_limit(
            self.rate_limit_requests_per_second,
            self.rate_limit_burst_size,
        )?;
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Get API key for a specific provider
    ///
    /// # Arguments
    /// * `provider` - "openai" or "deepgram" (case-insensitive)
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        match provider.to_lowercase().as_str() {
            "openai" => self
                .openai_api_key
                .clone()
                .ok_or_else(|| "OpenAI API key not configured in server environment".to_string()),
            "deepgram" => self.deepgram_api_key.clone().ok_or_else(|| {
                "Deepgram API key not configured in server environment".to_string()
            }),
            _ => Err(format!("Unsupported provider: {provider}")),
        }
    }

    pub fn function_call_timeout(&self) -> Duration {
        Duration::from_millis(self.function_call_timeout_ms)
    }

    /// Per-connection bridge settings derived from this configuration.
    ///
    /// Function calls are resolved by the client unless an HTTP handler is configured.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            settings_policy: self.settings_policy,
            default_voice: self.realtime_voice,
            audio: self.audio,
            client_side_functions: self.function_call_url.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    pub(super) fn cleanup_env_vars() {
        unsafe {
            for key in [
                "HOST",
                "PORT",
                "TLS_ENABLED",
                "TLS_CERT_PATH",
                "TLS_KEY_PATH",
                "OPENAI_API_KEY",
                "DEEPGRAM_API_KEY",
                "NATIVE_AGENT_URL",
                "REALTIME_URL",
                "REALTIME_MODEL",
                "REALTIME_VOICE",
                "FUNCTION_CALL_URL",
                "FUNCTION_CALL_TIMEOUT_MS",
                "SETTINGS_POLICY",
                "AUDIO_MAX_BUFFER_MS",
                "AUDIO_SILENCE_MS",
                "AUDIO_SILENCE_THRESHOLD",
                "AUDIO_MIN_COMMIT_MS",
                "LOG_LEVEL",
                "CORS_ALLOWED_ORIGINS",
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                "RATE_LIMIT_BURST_SIZE",
                "MAX_WEBSOCKET_CONNECTIONS",
                "MAX_CONNECTIONS_PER_IP",
            ] {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_address_and_tls() {
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".to_string();
        config.port = 3001;
        assert_eq!(config.address(), "127.0.0.1:3001");
        assert!(!config.is_tls_enabled());

        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from("/tmp/cert.pem"),
            key_path: PathBuf::from("/tmp/key.pem"),
        });
        assert!(config.is_tls_enabled());
    }

    #[test]
    fn test_get_api_key() {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());
        assert_eq!(config.get_api_key("OpenAI"), Ok("sk-test".to_string()));
        assert!(config.get_api_key("deepgram").is_err());
        assert!(
            config
                .get_api_key("azure")
                .unwrap_err()
                .contains("Unsupported provider")
        );
    }

    #[test]
    fn test_bridge_config_client_side_without_handler_url() {
        let mut config = ServerConfig::default();
        config.realtime_voice = OpenAIRealtimeVoice::Verse;
        config.settings_policy = SettingsPolicy::DeferUntilIdle;
        let bridge = config.bridge_config();
        assert!(bridge.client_side_functions);
        assert_eq!(bridge.default_voice, OpenAIRealtimeVoice::Verse);
        assert_eq!(bridge.settings_policy, SettingsPolicy::DeferUntilIdle);

        config.function_call_url = Some("http://localhost:4000/fn".to_string());
        assert!(!config.bridge_config().client_side_functions);
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 9090
providers:
  openai_api_key: "yaml-openai-key"
upstream:
  realtime_model: "gpt-realtime-mini"
  realtime_voice: "shimmer"
bridge:
  function_call_url: "https://functions.example.com/call"
  function_call_timeout_ms: 3000
  settings_policy: "defer"
  audio:
    max_buffer_ms: 5000
    silence_threshold: 300
logging:
  level: "debug"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.openai_api_key.as_deref(), Some("yaml-openai-key"));
        assert_eq!(config.realtime_model, OpenAIRealtimeModel::GptRealtimeMini);
        assert_eq!(config.realtime_voice, OpenAIRealtimeVoice::Shimmer);
        assert_eq!(
            config.function_call_url.as_deref(),
            Some("https://functions.example.com/call")
        );
        assert_eq!(config.function_call_timeout(), Duration::from_millis(3000));
        assert_eq!(config.settings_policy, SettingsPolicy::DeferUntilIdle);
        assert_eq!(config.audio.max_buffer_ms, 5000);
        assert_eq!(config.audio.silence_threshold, 300.0);
        assert_eq!(config.audio.silence_ms, 700);
        assert_eq!(config.log_level, "debug");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "server:\n  host: \"127.0.0.1\"\nproviders:\n  openai_api_key: \"yaml-key\"\n",
        )
        .unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("PORT", "7070");
            env::set_var("OPENAI_API_KEY", "env-key");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.openai_api_key.as_deref(), Some("yaml-key"));
        // Not in YAML, so the environment value stays
        assert_eq!(config.port, 7070);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_unknown_policy() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "bridge:\n  settings_policy: \"sometimes\"\n").unwrap();

        let result = ServerConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("settings_policy"));
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_relative_function_url() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "bridge:\n  function_call_url: \"/functions\"\n").unwrap();

        let result = ServerConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("FUNCTION_CALL_URL"));
    }

    #[test]
    #[serial]
    fn test_from_file_tls_from_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        let yaml_content = r#"
server:
  tls:
    enabled: true
    cert_path: "/etc/bridge/cert.pem"
    key_path: "/etc/bridge/key.pem"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.tls,
            Some(TlsConfig {
                cert_path: PathBuf::from("/etc/bridge/cert.pem"),
                key_path: PathBuf::from("/etc/bridge/key.pem"),
            })
        );
    }
}
