//! Configuration for the telemux binary.
//!
//! One TOML file plus `TELEMUX_` environment overrides, validated and
//! translated to `telemux_core::HubConfig`. Library consumers that build
//! a `HubConfig` directly never need this crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use telemux_api::{Jitter, ReconnectConfig, TlsMode, TransportConfig};
use telemux_core::{DEFAULT_ALERT_CAPACITY, DEFAULT_HISTORY_CAPACITY, HubConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TelemuxConfig {
    /// WebSocket endpoint of the dashboard backend (`ws://` or `wss://`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Samples kept per device.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Alerts kept by the alert feed.
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,

    /// Seconds between inventory polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Base URL of the REST backend. Inventory polling is off when unset.
    pub inventory_url: Option<String>,

    /// HTTP request timeout for inventory polls.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept self-signed certificates on the REST backend.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate for the REST backend.
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Extra headers sent with the WebSocket upgrade request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for TelemuxConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            history_capacity: default_history_capacity(),
            alert_capacity: default_alert_capacity(),
            poll_interval_secs: default_poll_interval(),
            inventory_url: None,
            timeout_secs: default_timeout(),
            insecure: false,
            ca_cert: None,
            reconnect: ReconnectSettings::default(),
            headers: BTreeMap::new(),
        }
    }
}

/// `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Give up after this many attempts. Unset retries forever.
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub jitter: JitterMode,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            max_retries: None,
            jitter: JitterMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    #[default]
    Full,
    None,
}

fn default_url() -> String {
    "ws://localhost:8080/ws".into()
}
fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}
fn default_alert_capacity() -> usize {
    DEFAULT_ALERT_CAPACITY
}
fn default_poll_interval() -> u64 {
    30
}
fn default_timeout() -> u64 {
    30
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30_000
}

// ── Translation ─────────────────────────────────────────────────────

impl TelemuxConfig {
    /// Check cross-field constraints that serde can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ws_url()?;
        self.inventory_base()?;

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::validation(
                "poll_interval_secs",
                "must be at least 1",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::validation("timeout_secs", "must be at least 1"));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::validation(
                "reconnect.initial_delay_ms",
                "must be at least 1",
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::validation(
                "reconnect.max_delay_ms",
                format!(
                    "{} is below initial_delay_ms ({})",
                    self.reconnect.max_delay_ms, self.reconnect.initial_delay_ms
                ),
            ));
        }
        Ok(())
    }

    /// Parsed WebSocket endpoint.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self
            .url
            .parse()
            .map_err(|e| ConfigError::validation("url", format!("{e}: {}", self.url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::validation(
                "url",
                format!("expected ws:// or wss://, got '{other}://'"),
            )),
        }
    }

    /// Parsed inventory base URL, if polling is configured.
    pub fn inventory_base(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = self.inventory_url.as_deref() else {
            return Ok(None);
        };
        let url: Url = raw
            .parse()
            .map_err(|e| ConfigError::validation("inventory_url", format!("{e}: {raw}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(ConfigError::validation(
                "inventory_url",
                format!("expected http:// or https://, got '{other}://'"),
            )),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_retries: self.reconnect.max_retries,
            jitter: match self.reconnect.jitter {
                JitterMode::Full => Jitter::Full,
                JitterMode::None => Jitter::None,
            },
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Validate and build the runtime hub configuration.
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        self.validate()?;
        let mut hub = HubConfig::new(self.ws_url()?)
            .with_reconnect(self.reconnect_config())
            .with_history_capacity(self.history_capacity)
            .with_alert_capacity(self.alert_capacity);
        for (name, value) in &self.headers {
            hub.connection = hub.connection.with_header(name, value);
        }
        Ok(hub)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "telemux", "telemux").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("telemux");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: defaults, then the TOML file, then environment.
///
/// Nested keys use a double underscore:
/// `TELEMUX_RECONNECT__MAX_DELAY_MS=5000`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(TelemuxConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TELEMUX_").split("__"))
}

/// Load and validate the config at `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<TelemuxConfig, ConfigError> {
    let config: TelemuxConfig = figment_for(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load from the platform config path.
pub fn load_config() -> Result<TelemuxConfig, ConfigError> {
    load_config_from(&config_path())
}

/// Load config, falling back to defaults if anything is wrong.
pub fn load_config_or_default() -> TelemuxConfig {
    load_config().unwrap_or_default()
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config_to(path: &Path, config: &TelemuxConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, config.to_toml()?)?;
    Ok(())
}
