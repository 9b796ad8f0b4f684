use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use covid_common::DEFAULT_COUNTRY_FIELD;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Overrides `scraper.api_key` so the key can stay out of the config file
pub const API_KEY_ENV: &str = "COVID_API_KEY";

const MAX_INTERVAL_MINUTES: u64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Record field matched against `/v1/{country}`
    #[serde(default = "default_country_field")]
    pub country_field: String,

    /// How long in-flight requests and refreshes may run after a shutdown signal
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    /// File the configuration was read from, `None` when running on defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    /// Request body sent to the provider, read once at startup
    #[serde(default = "default_payload_path")]
    pub payload_path: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_refresh_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("configuration already loaded")]
    AlreadyLoaded,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8008
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_country_field() -> String {
    DEFAULT_COUNTRY_FIELD.to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_endpoint() -> String {
    "https://api.dataflowkit.com/v1/parse".to_string()
}

fn default_payload_path() -> String {
    "coronaPayload.json".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_refresh_timeout_secs() -> u64 {
    300
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            payload_path: default_payload_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            timeout_secs: default_refresh_timeout_secs(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            country_field: default_country_field(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            scraper: ScraperConfig::default(),
            refresh: RefreshConfig::default(),
            source: None,
        }
    }
}

impl BackendConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BackendConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Read `path` if it exists, otherwise fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if !api_key.is_empty() {
                config.scraper.api_key = api_key;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.refresh.interval_minutes == 0 {
            return invalid("refresh.interval_minutes must be greater than zero");
        }
        if self.refresh.interval_minutes > MAX_INTERVAL_MINUTES {
            return invalid("refresh.interval_minutes must not exceed one year");
        }
        if self.refresh.timeout_secs == 0 {
            return invalid("refresh.timeout_secs must be greater than zero");
        }
        if self.scraper.request_timeout_secs == 0 {
            return invalid("scraper.request_timeout_secs must be greater than zero");
        }
        if self.shutdown_grace_secs == 0 {
            return invalid("shutdown_grace_secs must be greater than zero");
        }
        if self.scraper.endpoint.trim().is_empty() {
            return invalid("scraper.endpoint must not be empty");
        }
        if self.country_field.is_empty() {
            return invalid("country_field must not be empty");
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_minutes.saturating_mul(60))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

pub static CONFIG: OnceLock<BackendConfig> = OnceLock::new();

/// Load the process-wide configuration. Can only succeed once.
pub fn read_config(path: impl AsRef<Path>) -> Result<&'static BackendConfig, ConfigError> {
    let config = BackendConfig::load(path)?;
    CONFIG.set(config).map_err(|_| ConfigError::AlreadyLoaded)?;
    CONFIG.get().ok_or(ConfigError::AlreadyLoaded)
}
