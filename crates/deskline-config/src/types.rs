//! Configuration types.
//!
//! ```toml
//! [server]
//! api_url = "https://crm.example.com/api"
//! realtime_url = "wss://crm.example.com/ws"
//!
//! [auth]
//! token_file = "/home/me/.config/deskline/tokens.json"
//!
//! [http]
//! timeout_secs = 30
//!
//! [realtime]
//! max_backoff_secs = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfigError, Result};

/// Default backend API URL.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for realtime reconnect backoff, in seconds.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;

/// Default token file name within the config directory.
pub const TOKEN_FILE: &str = "tokens.json";

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration for a Deskline client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesklineConfig {
    /// Backend endpoints.
    pub server: ServerConfig,
    /// Credential storage.
    pub auth: AuthConfig,
    /// HTTP gateway settings.
    pub http: HttpConfig,
    /// Realtime connection settings.
    pub realtime: RealtimeConfig,
}

impl DesklineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override the backend API URL (CLI flag or environment).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.server.api_url = url.into();
        self
    }

    /// Parsed backend API URL.
    pub fn api_url(&self) -> Result<Url> {
        let url = Url::parse(&self.server.api_url).map_err(|e| ConfigError::InvalidUrl {
            field: "server.api_url".to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidUrl {
                field: "server.api_url".to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Realtime URL: explicit `server.realtime_url`, or the API URL
    /// rewritten to a WebSocket scheme with a `/ws` path.
    pub fn realtime_url(&self) -> Result<Url> {
        if let Some(ref explicit) = self.server.realtime_url {
            return Url::parse(explicit).map_err(|e| ConfigError::InvalidUrl {
                field: "server.realtime_url".to_string(),
                reason: e.to_string(),
            });
        }

        let mut url = self.api_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| ConfigError::InvalidUrl {
            field: "server.api_url".to_string(),
            reason: "cannot derive a websocket URL".to_string(),
        })?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Reconnect backoff cap as a [`Duration`].
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.realtime.max_backoff_secs)
    }

    /// Token file path: explicit `auth.token_file`, else `tokens.json`
    /// inside the config directory.
    pub fn token_file(&self) -> Result<PathBuf> {
        match self.auth.token_file {
            Some(ref path) => Ok(path.clone()),
            None => crate::xdg_config_dir()
                .map(|d| d.join(TOKEN_FILE))
                .ok_or(ConfigError::NoConfigDir),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the REST API.
    pub api_url: String,
    /// WebSocket URL of the realtime server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_url: None,
        }
    }
}

/// Credential storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Where the token pair is persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
}

/// HTTP gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Custom user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// Realtime connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Upper bound for the transport's reconnect backoff.
    pub max_backoff_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DesklineConfig::new();
        assert_eq!(config.server.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DesklineConfig::from_toml(
            r#"
[server]
api_url = "https://crm.example.com/api"
"#,
        )
        .unwrap();

        assert_eq!(config.server.api_url, "https://crm.example.com/api");
        assert_eq!(config.http.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.server.realtime_url.is_none());
    }

    #[test]
    fn test_realtime_url_derived_from_api_url() {
        let config = DesklineConfig::new().with_api_url("https://crm.example.com/api?x=1");
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "wss://crm.example.com/ws"
        );

        let config = DesklineConfig::new().with_api_url("http://localhost:3000");
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "ws://localhost:3000/ws"
        );
    }

    #[test]
    fn test_explicit_realtime_url_wins() {
        let mut config = DesklineConfig::new();
        config.server.realtime_url = Some("ws://rt.example.com:9000/socket".to_string());
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "ws://rt.example.com:9000/socket"
        );
    }

    #[test]
    fn test_api_url_rejects_non_http_scheme() {
        let config = DesklineConfig::new().with_api_url("ftp://example.com");
        let err = config.api_url().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_explicit_token_file() {
        let mut config = DesklineConfig::new();
        config.auth.token_file = Some(PathBuf::from("/tmp/tokens.json"));
        assert_eq!(
            config.token_file().unwrap(),
            PathBuf::from("/tmp/tokens.json")
        );
    }

    #[test]
    fn test_toml_roundtrip_preserves_overrides() {
        let mut config = DesklineConfig::new().with_api_url("https://a.example.com");
        config.http.timeout_secs = 5;
        let parsed = DesklineConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
