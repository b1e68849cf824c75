//! Configuration loading and persistence.
//!
//! Reads `config.json` from the snet config directory and layers `SNET_*`
//! environment overrides on top. The bearer token is never written to disk:
//! it comes from `SNET_TOKEN` or from whoever owns authentication.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::{ChatIdentity, Topics};
use crate::constants::{
    AUTO_CLOSE_DELAY, DEFAULT_ICON, DEFAULT_SERVER_URL, DEFAULT_WS_PATH, HANDSHAKE_TIMEOUT,
    HEARTBEAT_INCOMING, HEARTBEAT_OUTGOING, INBOX_TOPIC, MAX_BODY_CHARS, PRESENCE_TOPIC,
    RECONNECT_BASE, RECONNECT_CAP, RECONNECT_FACTOR, SEND_DESTINATION,
};
use crate::notify::PresenterConfig;
use crate::session::{Backoff, SessionConfig};
use crate::stomp::HeartBeat;
use crate::ws;

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Notification settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationSettings {
    /// Icon used when the sender has no avatar.
    pub default_icon: String,
    /// Auto-dismiss delay in milliseconds; 0 keeps notifications open.
    pub auto_close_ms: u64,
    /// Play a sound after presenting.
    pub sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            default_icon: DEFAULT_ICON.to_string(),
            auto_close_ms: millis(AUTO_CLOSE_DELAY),
            sound: true,
        }
    }
}

/// Configuration for the snet client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Messaging server base URL (`http(s)://host:port`).
    pub server_url: String,
    /// WebSocket path of the STOMP endpoint.
    pub ws_path: String,
    /// Bearer token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Signed-in user id; own messages never notify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Heart-beat interval in milliseconds, both directions. 0 disables.
    pub heartbeat_ms: u64,
    /// First reconnect delay ceiling in milliseconds.
    pub reconnect_base_ms: u64,
    /// Largest reconnect delay ceiling in milliseconds.
    pub reconnect_cap_ms: u64,
    /// Reconnect after exactly `reconnect_base_ms` every time, no jitter.
    pub fixed_reconnect: bool,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Private inbox topic.
    pub inbox_topic: String,
    /// Presence broadcast topic.
    pub presence_topic: String,
    /// Chat send destination.
    pub send_destination: String,
    /// Notification settings.
    pub notifications: NotificationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            token: String::new(),
            user_id: None,
            heartbeat_ms: millis(HEARTBEAT_OUTGOING.max(HEARTBEAT_INCOMING)),
            reconnect_base_ms: millis(RECONNECT_BASE),
            reconnect_cap_ms: millis(RECONNECT_CAP),
            fixed_reconnect: false,
            handshake_timeout_ms: millis(HANDSHAKE_TIMEOUT),
            inbox_topic: INBOX_TOPIC.to_string(),
            presence_topic: PRESENCE_TOPIC.to_string(),
            send_destination: SEND_DESTINATION.to_string(),
            notifications: NotificationSettings::default(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `SNET_CONFIG_DIR` env var: explicit override
    /// 2. `SNET_ENV=test`: `<tmp>/snet-test`
    /// 3. Default: platform config dir (Linux: ~/.config/snet)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SNET_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("snet-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("snet")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file.
    pub fn path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load `config.json` from `dir`; defaults when it does not exist.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `SNET_*` overrides read through `lookup`. Unparsable numbers
    /// are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("SNET_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(token) = lookup("SNET_TOKEN") {
            self.token = token;
        }

        if let Some(ws_path) = lookup("SNET_WS_PATH") {
            self.ws_path = ws_path;
        }

        let number = |name: &str| -> Option<u64> {
            let value = lookup(name)?;
            match value.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    log::warn!("Ignoring {}={:?}: not a number", name, value);
                    None
                }
            }
        };

        if let Some(ms) = number("SNET_HEARTBEAT_MS") {
            self.heartbeat_ms = ms;
        }
        if let Some(ms) = number("SNET_RECONNECT_BASE_MS") {
            self.reconnect_base_ms = ms;
        }
        if let Some(ms) = number("SNET_RECONNECT_CAP_MS") {
            self.reconnect_cap_ms = ms;
        }
        if let Some(id) = lookup("SNET_USER_ID").and_then(|v| v.trim().parse().ok()) {
            self.user_id = Some(id);
        }
    }

    /// Persists the current configuration to `dir`.
    /// Note: the token is never saved.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Check if we have a token to connect with.
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// WebSocket URL of the STOMP endpoint.
    pub fn endpoint(&self) -> String {
        ws::endpoint_url(&self.server_url, &self.ws_path)
    }

    /// Session settings.
    pub fn session_config(&self) -> SessionConfig {
        let heartbeat = Duration::from_millis(self.heartbeat_ms);
        let base = Duration::from_millis(self.reconnect_base_ms);
        let backoff = if self.fixed_reconnect {
            Backoff::fixed(base)
        } else {
            Backoff::exponential(base, RECONNECT_FACTOR, Duration::from_millis(self.reconnect_cap_ms))
        };
        SessionConfig {
            heartbeat: HeartBeat::new(heartbeat, heartbeat),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            backoff,
            ..SessionConfig::new(self.endpoint())
        }
    }

    /// Presenter settings.
    pub fn presenter_config(&self) -> PresenterConfig {
        let auto_close = self.notifications.auto_close_ms;
        PresenterConfig {
            default_icon: self.notifications.default_icon.clone(),
            auto_close: (auto_close > 0).then(|| Duration::from_millis(auto_close)),
            max_body_chars: MAX_BODY_CHARS,
            sound: self.notifications.sound,
        }
    }

    /// Chat topics.
    pub fn topics(&self) -> Topics {
        Topics {
            inbox: self.inbox_topic.clone(),
            presence: self.presence_topic.clone(),
            send: self.send_destination.clone(),
        }
    }

    /// Identity used by the chat notify rules.
    pub fn identity(&self) -> ChatIdentity {
        ChatIdentity {
            user_id: self.user_id,
            server_url: Some(self.server_url.clone()),
        }
    }
}
