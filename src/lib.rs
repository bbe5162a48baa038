//! They Might Say - Studio client
//!
//! Client library for the They Might Say historical-conversation backend:
//! - Streaming Studio chat over WebSocket, with chunked-HTTP fallback
//! - Session state machine (user turns, streaming buffer, finalized replies)
//! - Citation panel filtering and grouping
//! - REST client for auth, episodes, sources and document uploads

pub mod api;
pub mod chat;
pub mod citations;
pub mod error;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{ApiError, ApiResult, ChatError, ChatResult};

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: ApiYamlConfig,
    pub chat: ChatYamlConfig,
    /// Where login tokens are persisted between runs
    pub credentials_path: Option<String>,
}

/// Backend connection section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiYamlConfig {
    pub base_url: String,
    /// Socket base URL; derived from `base_url` when absent
    pub ws_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiYamlConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            ws_url: None,
            timeout_secs: 30,
        }
    }
}

/// Shortest reconnect delay accepted from configuration
pub const MIN_RECONNECT_DELAY_SECS: u64 = 1;

/// Studio chat section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatYamlConfig {
    /// Raised to [`MIN_RECONNECT_DELAY_SECS`] when lower
    pub reconnect_delay_secs: u64,
    /// Unset means reconnect forever
    pub max_reconnect_attempts: Option<u32>,
    /// Seconds between socket `ping` frames; 0 disables
    pub keepalive_secs: u64,
    pub prefer_websocket: bool,
}

impl Default for ChatYamlConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 3,
            max_reconnect_attempts: None,
            keepalive_secs: 30,
            prefer_websocket: true,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub api_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: Option<u32>,
    pub keepalive: Option<Duration>,
    pub prefer_websocket: bool,
    pub credentials_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let api_url = std::env::var("TMS_API_URL").unwrap_or(yaml.api.base_url);
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = std::env::var("TMS_WS_URL")
            .ok()
            .or(yaml.api.ws_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| derive_ws_url(&api_url));

        let timeout_secs = std::env::var("TMS_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(yaml.api.timeout_secs);
        let reconnect_secs = std::env::var("TMS_RECONNECT_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(yaml.chat.reconnect_delay_secs);
        if reconnect_secs < MIN_RECONNECT_DELAY_SECS {
            tracing::warn!(
                requested = reconnect_secs,
                "Reconnect delay too short, using {}s",
                MIN_RECONNECT_DELAY_SECS
            );
        }
        let reconnect_secs = reconnect_secs.max(MIN_RECONNECT_DELAY_SECS);
        let keepalive = match yaml.chat.keepalive_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let credentials_path = std::env::var("TMS_CREDENTIALS")
            .ok()
            .or(yaml.credentials_path)
            .map(PathBuf::from)
            .unwrap_or_else(default_credentials_path);

        Ok(Self {
            api_url,
            ws_url,
            api_timeout: Duration::from_secs(timeout_secs),
            reconnect_delay: Duration::from_secs(reconnect_secs),
            max_reconnect_attempts: yaml.chat.max_reconnect_attempts,
            keepalive,
            prefer_websocket: yaml.chat.prefer_websocket,
            credentials_path,
        })
    }

    /// REST client settings derived from this config
    pub fn api_config(&self) -> api::ApiConfig {
        api::ApiConfig {
            base_url: self.api_url.clone(),
            timeout: self.api_timeout,
        }
    }

    /// Socket reconnect policy derived from this config
    pub fn reconnect_policy(&self) -> chat::ReconnectPolicy {
        chat::ReconnectPolicy {
            delay: self.reconnect_delay,
            max_attempts: self.max_reconnect_attempts,
            keepalive: self.keepalive,
        }
    }

    /// Socket endpoint for a given user
    pub fn chat_socket_url(&self, user_id: &str) -> String {
        format!("{}/api/studio/ws/{}", self.ws_url, user_id)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Map an http(s) base URL onto its ws(s) counterpart.
pub fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("they-might-say")
        .join("credentials.json")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
api:
  base_url: https://studio.example.com
  timeout_secs: 10

chat:
  reconnect_delay_secs: 5
  max_reconnect_attempts: 20
  prefer_websocket: false

credentials_path: /tmp/tms-creds.json
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "https://studio.example.com");
        assert_eq!(config.api.timeout_secs, 10);
        assert!(config.api.ws_url.is_none());
        assert_eq!(config.chat.reconnect_delay_secs, 5);
        assert_eq!(config.chat.max_reconnect_attempts, Some(20));
        assert!(!config.chat.prefer_websocket);
        assert_eq!(
            config.credentials_path.as_deref(),
            Some("/tmp/tms-creds.json")
        );
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.chat.reconnect_delay_secs, 3);
        assert!(config.chat.max_reconnect_attempts.is_none());
        assert_eq!(config.chat.keepalive_secs, 30);
        assert!(config.chat.prefer_websocket);
    }

    #[test]
    fn test_partial_chat_section_keeps_defaults() {
        let yaml = r#"
chat:
  prefer_websocket: false
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chat.reconnect_delay_secs, 3);
        assert!(!config.chat.prefer_websocket);
    }

    #[test]
    fn test_derive_ws_url() {
        assert_eq!(derive_ws_url("http://localhost:8000"), "ws://localhost:8000");
        assert_eq!(
            derive_ws_url("https://studio.example.com"),
            "wss://studio.example.com"
        );
        assert_eq!(derive_ws_url("ws://already"), "ws://already");
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "TMS_API_URL",
                "TMS_WS_URL",
                "TMS_API_TIMEOUT_SECS",
                "TMS_RECONNECT_DELAY_SECS",
                "TMS_CREDENTIALS",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
api:
  base_url: http://yaml-host:9000/
chat:
  reconnect_delay_secs: 7
credentials_path: /tmp/yaml-creds.json
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_url, "http://yaml-host:9000");
        assert_eq!(config.ws_url, "ws://yaml-host:9000");
        assert_eq!(config.reconnect_delay, Duration::from_secs(7));
        assert_eq!(config.credentials_path, PathBuf::from("/tmp/yaml-creds.json"));
        assert_eq!(
            config.chat_socket_url("u-1"),
            "ws://yaml-host:9000/api/studio/ws/u-1"
        );

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("TMS_API_URL", "https://env-host");
        std::env::set_var("TMS_RECONNECT_DELAY_SECS", "1");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_url, "https://env-host");
        assert_eq!(config.ws_url, "wss://env-host");
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        // YAML value still used where no env override
        assert_eq!(config.credentials_path, PathBuf::from("/tmp/yaml-creds.json"));

        // --- Phase 2b: a zero delay would spin against a down backend ---
        std::env::set_var("TMS_RECONNECT_DELAY_SECS", "0");
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(
            config.reconnect_delay,
            Duration::from_secs(MIN_RECONNECT_DELAY_SECS)
        );
        assert_eq!(config.reconnect_policy().delay, Duration::from_secs(1));
        std::env::remove_var("TMS_RECONNECT_DELAY_SECS");

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-tms-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert!(config.max_reconnect_attempts.is_none());
        assert_eq!(config.keepalive, Some(Duration::from_secs(30)));
        assert!(config.prefer_websocket);
        assert!(config.credentials_path.ends_with("credentials.json"));
    }
}
