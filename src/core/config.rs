//! Configuration management

use clap::{Args, Parser, Subcommand};
use config::{builder::DefaultState, Config as ConfigSource, ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid app configuration: {0}")]
    InvalidApp(String),

    #[error("Invalid http configuration: {0}")]
    InvalidHttp(String),

    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::BridgeError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::BridgeError::ConfigError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub http: HttpConfig,
    pub plugins: PluginsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigSource::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables are prefixed with RULIA_ and use __ for nesting
        // Example: RULIA_HTTP__CONNECT_TIMEOUT_MS=5000
        builder = builder.add_source(
            Environment::with_prefix("RULIA")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(storage_dir) = &cli_args.storage_dir {
            builder = builder.set_override(
                "storage.local_storage_dir",
                storage_dir.display().to_string(),
            )?;
        }

        let mut config: Config = builder.build()?.try_deserialize()?;
        if let Some(config_path) = &cli_args.config {
            config.plugins.user_config = read_user_config(config_path)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let mut config: Config = with_defaults(ConfigSource::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        config.plugins.user_config = read_user_config(path)?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration made only of built-in defaults
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigSource::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.app.validate()?;
        self.http.validate()?;
        self.plugins.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn default_storage_dir() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("rulia").join("plugin-storage"))
        .unwrap_or_else(|| PathBuf::from("./data/plugin-storage"))
        .display()
        .to_string()
}

/// Read `[plugins.user_config.<plugin>]` tables straight from the TOML file
///
/// The layered loader folds keys to lower case, while plugin names and
/// their config keys are matched exactly.
fn read_user_config(path: &Path) -> Result<HashMap<String, HashMap<String, String>>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
    let document: toml::Table = content
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::LoadError(e.to_string()))?;

    let Some(plugins) = document
        .get("plugins")
        .and_then(|plugins| plugins.get("user_config"))
    else {
        return Ok(HashMap::new());
    };
    let plugins = plugins.as_table().ok_or_else(|| {
        ConfigError::InvalidPlugin("plugins.user_config must be a table".to_string())
    })?;

    let mut user_config = HashMap::with_capacity(plugins.len());
    for (plugin, values) in plugins {
        let values = values.as_table().ok_or_else(|| {
            ConfigError::InvalidPlugin(format!("plugins.user_config.{} must be a table", plugin))
        })?;
        let values = values
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();
        user_config.insert(plugin.clone(), values);
    }
    Ok(user_config)
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("app.version", env!("CARGO_PKG_VERSION"))?
        .set_default("http.user_agent", concat!("Rulia/", env!("CARGO_PKG_VERSION")))?
        .set_default("http.connect_timeout_ms", 10_000)?
        .set_default("http.accept_invalid_certs", false)?
        .set_default("plugins.max_execution_time_ms", 0)?
        .set_default("storage.local_storage_dir", default_storage_dir())?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.rotation", "daily")?)
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "rulia-bridge")]
#[command(about = "Rulia plugin bridge diagnostics", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Directory holding plugin local storage
    #[arg(long, value_name = "DIR", global = true)]
    pub storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one HTTP envelope through the bridge and print the result
    Request(RequestArgs),
    /// Print the host version reported to plugins
    Version,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// Request URL
    #[arg(long)]
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Pre-serialized request payload
    #[arg(short = 'd', long)]
    pub payload: Option<String>,

    /// Content type of the payload
    #[arg(long)]
    pub content_type: Option<String>,

    /// Timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Custom header, as `Name: value`
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Print `{data, headers}` instead of the raw body
    #[arg(long)]
    pub with_headers: bool,

    /// Plugin name the request is attributed to
    #[arg(long, default_value = "cli")]
    pub plugin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Version string reported to plugins by `getAppVersion`
    pub version: String,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidApp("version cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_ms: u64, // 0 disables the connect timeout
    pub accept_invalid_certs: bool,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_agent.is_empty() {
            return Err(ConfigError::InvalidHttp("user_agent cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Upper bound for one invocation, 0 means unbounded
    pub max_execution_time_ms: u64,

    /// Per-plugin user config returned by `getUserConfig`, read from the
    /// config file only
    #[serde(skip)]
    pub user_config: HashMap<String, HashMap<String, String>>,
}

impl PluginsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = self.user_config.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::InvalidPlugin(format!(
                "user_config has an entry with an empty plugin name: {:?}",
                name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub local_storage_dir: PathBuf,
    /// JSON cookie export from the web view, served by `getCookies`
    pub cookie_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage(
                "local_storage_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub rotation: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["never", "hourly", "daily"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        Ok(())
    }
}
