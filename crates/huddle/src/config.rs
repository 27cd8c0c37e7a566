use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A wire transport the client can open, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent WebSocket; lowest latency.
    Websocket,
    /// HTTP long-polling fallback.
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client connection settings.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub ws_path: String,
    pub poll_path: String,
    pub transports: Vec<TransportKind>,
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Client-side timeout for one long-poll request.
    pub poll_timeout_ms: u64,
    /// Send cookies with both transports.
    pub with_credentials: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: crate::DEFAULT_SERVER_URL.to_string(),
            ws_path: "/ws".to_string(),
            poll_path: "/poll".to_string(),
            transports: vec![TransportKind::Websocket, TransportKind::Polling],
            reconnection_attempts: 5,
            reconnection_delay_ms: 1_000,
            connect_timeout_ms: 10_000,
            poll_timeout_ms: 30_000,
            with_credentials: true,
        }
    }
}

impl ClientConfig {
    /// Load from the default config path, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transports.is_empty() {
            bail!("at least one transport must be configured");
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            bail!("server_url must be an http(s) URL, got {}", self.server_url);
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("huddle")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("huddle")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/huddle-{uid}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_connection_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://localhost:8000");
        assert_eq!(
            config.transports,
            vec![TransportKind::Websocket, TransportKind::Polling]
        );
        assert_eq!(config.reconnection_attempts, 5);
        assert_eq!(config.reconnection_delay(), Duration::from_millis(1000));
        assert_eq!(config.connect_timeout(), Duration::from_millis(10_000));
        assert!(config.with_credentials);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "server_url = \"https://chat.example.com\"\ntransports = [\"polling\"]\n",
        )
        .unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.server_url, "https://chat.example.com");
        assert_eq!(config.transports, vec![TransportKind::Polling]);
        assert_eq!(config.reconnection_attempts, 5);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn empty_transport_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "transports = []\n").unwrap();
        let err = ClientConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let config = ClientConfig {
            server_url: "ftp://example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
