//! Configuration management with environment variable support and validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_mb: usize,
    pub enable_cors: bool,
    pub allowed_origins: Vec<String>,
    /// Global request budget; 0 disables rate limiting.
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size_mb: 5,
            enable_cors: false,
            allowed_origins: vec!["*".to_string()],
            rate_limit_per_minute: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Which [`KeyStore`](crate::store::KeyStore) backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InMemory,
    File,
}

/// Store and expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub data_dir: Option<PathBuf>,
    /// Inactivity window after which a key is reclaimed.
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InMemory,
            data_dir: Some(PathBuf::from("data")),
            ttl_seconds: 20 * 60,
            sweep_interval_seconds: 60,
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

impl Settings {
    /// Load settings from the embedded defaults, an optional config file and
    /// `MSTORE_`-prefixed environment variables, in that order.
    ///
    /// Without an explicit path, `./median_store.toml` is used when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from_str(
            include_str!("../config.toml"),
            FileFormat::Toml,
        ));

        builder = match config_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("median_store").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("MSTORE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        Self::apply_env_overrides(&mut settings)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Short-form environment overrides for the most commonly changed values.
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(host) = std::env::var("MSTORE_HOST") {
            settings.server.host = host;
        }
        if let Ok(port) = std::env::var("MSTORE_PORT") {
            settings.server.port = port.parse()?;
        }
        if let Ok(dir) = std::env::var("MSTORE_DATA_DIR") {
            settings.store.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Validate settings for consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.server.max_request_size_mb == 0 {
            return Err(anyhow!("Max request size cannot be 0"));
        }
        if self.store.ttl_seconds == 0 {
            return Err(anyhow!("store.ttl_seconds must be positive"));
        }
        if self.store.sweep_interval_seconds == 0 {
            return Err(anyhow!("store.sweep_interval_seconds must be positive"));
        }
        if self.store.backend == BackendKind::File && self.store.data_dir.is_none() {
            return Err(anyhow!("File backend requires store.data_dir"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!("Unknown logging format: {}", self.logging.format));
        }
        Ok(())
    }

    /// Valid but questionable combinations. Returned rather than logged, since
    /// settings are loaded before the subscriber is installed.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.store.sweep_interval_seconds > self.store.ttl_seconds {
            warnings.push(format!(
                "Sweep interval ({}s) exceeds TTL ({}s); idle keys may outlive the TTL by up to one interval",
                self.store.sweep_interval_seconds, self.store.ttl_seconds
            ));
        }
        warnings
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
