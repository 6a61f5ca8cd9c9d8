//! Application configuration loading, validation, and management.
//!
//! The top-level `Config` aggregates logging, transport and agent sections.
//! It is loaded once at startup from TOML, validated, completed with values
//! derived from the device identity, and stays immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{
    agent::{AgentConfig, EventsConfig, SnapshotConfig, SpoolConfig, UploadConfig, VisionConfig},
    logger::LoggerConfig,
};

pub mod agent;
pub mod logger;

/// Environment variable pointing at the configuration file.
pub const CONFIG_ENV: &str = "EDGEWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "/etc/edgewatch/config.toml";

const FALLBACK_DEVICE_ID: &str = "iot-device";

/// Timestamped console output for use before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::config::print_line(console::style("INFO").green(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::config::print_line(console::style("WARN").yellow(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        $crate::config::print_line(console::style("ERROR").red(), format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn print_line(level: console::StyledObject<&str>, message: std::fmt::Arguments<'_>) {
    let now = time::OffsetDateTime::now_utc();
    let format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    let timestamp = now.format(format).unwrap_or_default();
    println!("{}  {} {}", console::style(timestamp).dim(), level, message);
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type TransportConfig = edgewatch_mqtt::Config;

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub transport: TransportConfig,

    #[validate(nested)]
    pub agent: AgentConfig,

    #[validate(nested)]
    pub spool: SpoolConfig,

    #[validate(nested)]
    pub events: EventsConfig,

    #[validate(nested)]
    pub vision: VisionConfig,

    #[validate(nested)]
    pub snapshots: SnapshotConfig,

    #[validate(nested)]
    pub upload: UploadConfig,
}

impl Config {
    /// Locates, loads and completes the configuration.
    ///
    /// Without any configuration file the agent runs on defaults.
    pub fn new() -> Result<Self, ConfigError> {
        let config = match Self::get_config_path()? {
            Some(path) => Self::load(&path)?,
            None => {
                print_warn!(
                    "No configuration file found ({} unset, {} missing); using defaults",
                    CONFIG_ENV,
                    DEFAULT_CONFIG_PATH
                );
                Config::default()
            }
        };
        Ok(config.resolved(&system_hostname()))
    }

    /// Priority: `EDGEWATCH_CONFIG`, then `/etc/edgewatch/config.toml`.
    ///
    /// A path named by the environment variable must exist.
    fn get_config_path() -> Result<Option<PathBuf>, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            if !path.exists() {
                return Err(ConfigError::Config(format!(
                    "{} points at a missing file: {}",
                    CONFIG_ENV,
                    path.display()
                )));
            }
            return Ok(Some(path));
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(Some(fallback.to_path_buf()));
        }

        Ok(None)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }

    /// Fills in values derived from the device identity:
    /// - `agent.device_id` defaults to `hostname`
    /// - `transport.base_topic` defaults to `home/iot/<device_id>`
    /// - `transport.client_id` defaults to the device id
    pub fn resolved(mut self, hostname: &str) -> Self {
        if self.agent.device_id.is_empty() {
            self.agent.device_id = if hostname.is_empty() {
                FALLBACK_DEVICE_ID.to_string()
            } else {
                hostname.to_string()
            };
        }
        if self.transport.base_topic.is_empty() {
            self.transport.base_topic = format!("home/iot/{}", self.agent.device_id);
        }
        if self.transport.client_id.is_empty() {
            self.transport.client_id = self.agent.device_id.clone();
        }
        self
    }

    pub fn device_id(&self) -> &str {
        &self.agent.device_id
    }

    pub fn telemetry_topic(&self) -> String {
        self.transport.with_base_topic("telemetry")
    }

    pub fn events_topic(&self) -> String {
        self.transport.with_base_topic("events")
    }
}

fn system_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|path| {
            fs::read_to_string(path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_default()
}
