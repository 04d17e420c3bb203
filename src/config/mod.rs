// ABOUTME: Configuration management for wall-live
// Layers TOML files and environment overrides over built-in endpoint and reconnect defaults

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::live::ws_transport::DEFAULT_CONNECT_TIMEOUT;
use crate::live::{ReconnectPolicy, SessionEndpoints};

/// Default session channel endpoint
pub const DEFAULT_SESSION_ENDPOINT: &str = "wss://climber.dev.maptnh.net/ws/holds/";

/// Default preview channel endpoint
pub const DEFAULT_PREVIEW_ENDPOINT: &str = "wss://climber.dev.maptnh.net/ws/";

/// Environment variable overriding the session endpoint
pub const ENV_SESSION_URL: &str = "WALL_LIVE_SESSION_URL";

/// Environment variable overriding the preview endpoint
pub const ENV_PREVIEW_URL: &str = "WALL_LIVE_PREVIEW_URL";

const CONFIG_DIR: &str = ".wall-live";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Live session channel
    pub session: EndpointConfig,

    /// Route preview (default) channel
    pub preview: PreviewConfig,

    /// Backoff for the session channel
    pub reconnect: ReconnectPolicy,

    /// WebSocket transport settings
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub endpoint: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SESSION_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub endpoint: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PREVIEW_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket handshake timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl LiveConfig {
    /// Load configuration from default locations, then `explicit`, then the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut paths: Vec<PathBuf> = Self::get_config_paths()
            .into_iter()
            .filter(|path| path.exists())
            .collect();

        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            paths.push(path.to_path_buf());
        }

        let mut config = Self::load_from(&paths)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Layer the given TOML files over the defaults, later files winning per key
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();

        for path in paths {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let layer: toml::Table = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            merge_tables(&mut merged, layer);
        }

        toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration values")
    }

    /// Apply endpoint overrides looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SESSION_URL).filter(|v| !v.trim().is_empty()) {
            self.session.endpoint = url.trim().to_string();
        }
        if let Some(url) = lookup(ENV_PREVIEW_URL).filter(|v| !v.trim().is_empty()) {
            self.preview.endpoint = url.trim().to_string();
        }
    }

    /// Reject endpoints that are not WebSocket URLs and a zero attempt ceiling
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("session.endpoint", &self.session.endpoint)?;
        validate_endpoint("preview.endpoint", &self.preview.endpoint)?;

        if self.reconnect.max_attempts == 0 {
            bail!("reconnect.max_attempts must be at least 1");
        }
        if self.reconnect.base_delay.is_zero() {
            bail!("reconnect.base_delay must be greater than zero");
        }
        if self.transport.connect_timeout.is_zero() {
            bail!("transport.connect_timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn endpoints(&self) -> SessionEndpoints {
        SessionEndpoints {
            session: self.session.endpoint.clone(),
            preview: self.preview.endpoint.clone(),
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Get configuration file paths in order of precedence (lowest first)
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. User config (~/.wall-live/config.toml)
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(CONFIG_DIR).join(CONFIG_FILE));
        }

        // 2. Local project config
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(CONFIG_DIR).join(CONFIG_FILE));
        }

        paths
    }
}

fn validate_endpoint(field: &str, endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint).with_context(|| format!("{field} is not a valid URL: {endpoint}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => bail!("{field} must use ws or wss, got '{other}'"),
    }
}

/// Recursive merge; tables combine, everything else is replaced
fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
