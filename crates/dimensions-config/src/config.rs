//! Configuration structs with sensible defaults and RON persistence.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the config inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where the proxy accepts client connections.
    pub listen: ListenConfig,
    /// Backend servers, in the order they are listed to players.
    pub dimensions: Vec<DimensionConfig>,
    /// Dimension new clients are bound to.
    pub default_dimension: String,
    /// Chat command settings.
    pub commands: CommandConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Client listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Interface to bind.
    pub bind_address: String,
    /// Port to bind.
    pub port: u16,
    /// Connections beyond this are refused.
    pub max_connections: usize,
}

/// One backend game-world server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionConfig {
    /// Name players switch with, e.g. `/lobby`. Matched case-insensitively.
    pub name: String,
    /// `host:port` of the backend.
    pub address: String,
}

impl DimensionConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Chat command configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Leading character that turns a chat line into a command.
    pub marker: char,
    /// Delay before the player-count reply, so it lands after the backend's.
    pub who_reply_delay_ms: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level filter (e.g., "debug", "info", "warn,dimensions_proxy=debug").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            dimensions: vec![DimensionConfig::new("lobby", "127.0.0.1:7778")],
            default_dimension: "lobby".to_string(),
            commands: CommandConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7777,
            max_connections: 256,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            marker: '/',
            who_reply_delay_ms: 100,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ListenConfig {
    /// `bind_address:port`, ready for `TcpListener::bind`.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl CommandConfig {
    pub fn who_reply_delay(&self) -> Duration {
        Duration::from_millis(self.who_reply_delay_ms)
    }
}

/// Platform config directory for the proxy, e.g. `~/.config/dimensions`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dimensions")
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Check the config describes a proxy that can start.
    ///
    /// Dimension names are compared case-insensitively, the way commands
    /// are matched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::Invalid("no dimensions configured".into()));
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            let name = dimension.name.to_lowercase();
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "dimension name {:?} must be a single non-empty word",
                    dimension.name
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate dimension {:?}",
                    dimension.name
                )));
            }
        }

        if !seen.contains(&self.default_dimension.to_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "default dimension {:?} is not configured",
                self.default_dimension
            )));
        }

        if self.commands.marker.is_whitespace() {
            return Err(ConfigError::Invalid("command marker cannot be whitespace".into()));
        }
        Ok(())
    }
}
