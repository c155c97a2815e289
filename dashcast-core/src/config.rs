use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
    pub capture: CaptureConfig,
    pub screens: Vec<ScreenConfig>,
    pub cast: CastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the receiver application assets, served at `/`
    pub static_dir: String,
    /// Signal host announced to receivers. Derived from the local address when unset.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            static_dir: "media".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Outbound queue length per signaling connection
    pub outbound_buffer: usize,
    /// Maximum inbound WebSocket frame size in bytes
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Base URL of the capture agent driving the browser
    pub endpoint: Option<String>,
    pub ping_interval_secs: u64,
    pub restart_delay_ms: u64,
    pub relaunch_delay_secs: u64,
    pub op_timeout_secs: u64,
    /// Default capture zoom, overridable per screen
    pub zoom: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            ping_interval_secs: 60,
            restart_delay_ms: 1000,
            relaunch_delay_secs: 5,
            op_timeout_secs: 60,
            zoom: 0.75,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    #[must_use]
    pub const fn relaunch_delay(&self) -> Duration {
        Duration::from_secs(self.relaunch_delay_secs)
    }

    #[must_use]
    pub const fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

/// One captured dashboard page. Its name doubles as the room id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub cookies: Vec<CookieConfig>,
    #[serde(default)]
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    /// Plain string, or an object that is JSON-encoded before it is set
    pub value: serde_json::Value,
    #[serde(default)]
    pub domain: Option<String>,
}

impl CookieConfig {
    #[must_use]
    pub fn value_string(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticDevice {
    pub host: String,
    pub name: String,
}

/// How receivers are found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Browse `_googlecast._tcp` over mDNS; `devices` are announced as well
    #[default]
    Mdns,
    /// Only the listed `devices`
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    /// Receiver application id launched on every device
    pub app_id: String,
    pub poll_interval_secs: u64,
    pub op_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    /// Consecutive buffering polls tolerated before forcing a reload
    pub max_buffering_polls: u32,
    pub rediscovery_delay_secs: u64,
    /// Device friendly name -> screen/room
    pub mapping: HashMap<String, String>,
    pub default_screen: Option<String>,
    pub discovery: DiscoveryMode,
    /// Interface mDNS browses on, by name. All interfaces when unset.
    pub network_interface: Option<String>,
    /// Devices announced by static discovery
    pub devices: Vec<StaticDevice>,
    /// HTTP cast bridge. Device supervision is disabled when unset.
    pub bridge_url: Option<String>,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            app_id: "14E2E176".to_string(),
            poll_interval_secs: 60,
            op_timeout_secs: 60,
            stop_timeout_secs: 5,
            max_buffering_polls: 5,
            rediscovery_delay_secs: 60,
            mapping: HashMap::new(),
            default_screen: None,
            discovery: DiscoveryMode::Mdns,
            network_interface: None,
            devices: Vec::new(),
            bridge_url: None,
        }
    }
}

impl CastConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    #[must_use]
    pub const fn rediscovery_delay(&self) -> Duration {
        Duration::from_secs(self.rediscovery_delay_secs)
    }

    /// Room a device is assigned to: explicit mapping, else the default screen
    #[must_use]
    pub fn room_for(&self, friendly_name: &str) -> String {
        self.mapping
            .get(friendly_name)
            .cloned()
            .or_else(|| self.default_screen.clone())
            .unwrap_or_default()
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority, `DASHCAST_SERVER__PORT` style)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DASHCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Collect every configuration problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.capture.ping_interval_secs == 0 {
            errors.push("capture.ping_interval_secs must be greater than 0".to_string());
        }
        if self.capture.op_timeout_secs == 0 {
            errors.push("capture.op_timeout_secs must be greater than 0".to_string());
        }
        if self.cast.poll_interval_secs == 0 {
            errors.push("cast.poll_interval_secs must be greater than 0".to_string());
        }
        if self.cast.op_timeout_secs == 0 || self.cast.stop_timeout_secs == 0 {
            errors.push("cast timeouts must be greater than 0".to_string());
        }
        if self.cast.max_buffering_polls == 0 {
            errors.push("cast.max_buffering_polls must be greater than 0".to_string());
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }
        if self.logging.format.parse::<crate::logging::LogFormat>().is_err() {
            errors.push(format!("logging.format must be json or pretty, got '{}'", self.logging.format));
        }
        if self.relay.outbound_buffer == 0 {
            errors.push("relay.outbound_buffer must be greater than 0".to_string());
        }

        let mut names = HashSet::new();
        for screen in &self.screens {
            if screen.name.trim().is_empty() {
                errors.push(format!("screen with url '{}' has an empty name", screen.url));
            } else if !names.insert(screen.name.as_str()) {
                errors.push(format!("duplicate screen name '{}'", screen.name));
            }
            if url::Url::parse(&screen.url).is_err() {
                errors.push(format!("screen '{}' has an invalid url '{}'", screen.name, screen.url));
            }
        }

        for (device, room) in &self.cast.mapping {
            if !names.contains(room.as_str()) {
                errors.push(format!("cast.mapping['{device}'] names unknown screen '{room}'"));
            }
        }
        if let Some(default_screen) = &self.cast.default_screen {
            if !names.contains(default_screen.as_str()) {
                errors.push(format!("cast.default_screen names unknown screen '{default_screen}'"));
            }
        }

        for (field, value) in [
            ("cast.bridge_url", &self.cast.bridge_url),
            ("capture.endpoint", &self.capture.endpoint),
            ("server.public_url", &self.server.public_url),
        ] {
            if let Some(value) = value {
                if url::Url::parse(value).is_err() {
                    errors.push(format!("{field} is not a valid url: '{value}'"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
