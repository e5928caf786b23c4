//! Demo configuration loading from file and environment variables.

use easylite_db::Settings;
use serde::Deserialize;
use thiserror::Error;

/// Top-level demo configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Directory of `<version>_<name>.sql` files. The embedded migrations
    /// are used when unset.
    #[serde(default)]
    pub migrations_dir: Option<String>,

    /// Connection pool tuning.
    #[serde(default)]
    pub pool: Settings,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "easylite_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    "easylite-demo.sqlite".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            migrations_dir: None,
            pool: Settings::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `EASYLITE_DB_PATH` overrides `database.path`
/// - `EASYLITE_MIGRATIONS_DIR` overrides `database.migrations_dir`
/// - `EASYLITE_LOG_LEVEL` overrides `logging.level`
/// - `EASYLITE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = var("EASYLITE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(dir) = var("EASYLITE_MIGRATIONS_DIR") {
        config.database.migrations_dir = Some(dir).filter(|dir| !dir.trim().is_empty());
    }
    if let Some(level) = var("EASYLITE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("EASYLITE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
