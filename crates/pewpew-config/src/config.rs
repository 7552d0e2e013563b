//! Relay configuration with defaults, RON persistence and environment
//! overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Environment variable that overrides [`ServerConfig::port`].
pub const PORT_ENV: &str = "PORT";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and connection settings.
    pub server: ServerConfig,
    /// Session core settings.
    pub relay: RelayConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind (`0.0.0.0`, `::`, ...).
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_size: u32,
    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,
}

/// How player ids are generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdGeneratorConfig {
    /// Random UUID v4.
    #[default]
    Uuid,
    /// Run this program and use its trimmed stdout (e.g. `"uuidgen"`).
    Command(String),
}

/// Session core settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Group every registered player joins.
    pub default_group: String,
    /// Drop in-game events from sessions that have not signed up.
    pub require_registration: bool,
    /// Player id source.
    pub id_generator: IdGeneratorConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset (e.g. `"info"`, `"pewpew_relay=debug"`).
    pub level: String,
    /// Also write JSON logs to `<json_dir>/pewpew.log`.
    pub json_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            max_connections: 256,
            outbound_queue: 256,
            max_frame_size: 1_048_576,
            tcp_nodelay: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_group: "gamers".to_string(),
            require_registration: false,
            id_generator: IdGeneratorConfig::Uuid,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
        }
    }
}

/// `<platform config dir>/pewpew`, or `./config` when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("pewpew"))
        .unwrap_or_else(|| PathBuf::from("config"))
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
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

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }

    /// Apply overrides from the process environment (`PORT`).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. An empty `PORT`
    /// counts as unset.
    pub fn apply_env_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let Some(raw) = lookup(PORT_ENV) else {
            return Ok(());
        };
        let value = raw.trim();
        if value.is_empty() {
            return Ok(());
        }
        let port = value
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw.clone()))?;
        log::info!("Using port {port} from {PORT_ENV}");
        self.server.port = port;
        Ok(())
    }
}
