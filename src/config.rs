use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SCALE_PORT: u16 = 502;
const DEFAULT_SCALE_UNIT_ID: u8 = 1;
const DEFAULT_SCALE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_SCALE_POLL_INTERVAL_MILLIS: u64 = 1000;
const DEFAULT_EVENT_QUEUE_SIZE: usize = 1024;
const DEFAULT_EVENT_FANOUT_CAPACITY: usize = 256;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Host address to bind the HTTP server to
    pub host: String,

    /// Port for the HTTP server
    pub port: u16,

    /// Deployment environment: development, staging, production
    pub environment: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,

    /// Run pending migrations on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Database pool tuning
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 512))]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Scale device address (Modbus/TCP)
    #[serde(default = "default_scale_host")]
    pub scale_host: String,
    #[serde(default = "default_scale_port")]
    pub scale_port: u16,
    #[serde(default = "default_scale_unit_id")]
    pub scale_unit_id: u8,
    /// Hard bound on connect/read time per scale session
    #[serde(default = "default_scale_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub scale_timeout_secs: u64,
    /// Cadence of the live-weight SSE stream
    #[serde(default = "default_scale_poll_interval_millis")]
    pub scale_poll_interval_millis: u64,

    /// Bound of the internal event intake channel
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    /// Per-observer broadcast buffer; lagged observers drop old events
    #[serde(default = "default_event_fanout_capacity")]
    pub event_fanout_capacity: usize,

    /// Comma-separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
    #[serde(default)]
    pub cors_allow_credentials: bool,
}

fn default_true() -> bool {
    true
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_scale_host() -> String {
    "192.168.10.21".to_string()
}
fn default_scale_port() -> u16 {
    DEFAULT_SCALE_PORT
}
fn default_scale_unit_id() -> u8 {
    DEFAULT_SCALE_UNIT_ID
}
fn default_scale_timeout_secs() -> u64 {
    DEFAULT_SCALE_TIMEOUT_SECS
}
fn default_scale_poll_interval_millis() -> u64 {
    DEFAULT_SCALE_POLL_INTERVAL_MILLIS
}
fn default_event_queue_size() -> usize {
    DEFAULT_EVENT_QUEUE_SIZE
}
fn default_event_fanout_capacity() -> usize {
    DEFAULT_EVENT_FANOUT_CAPACITY
}

impl AppConfig {
    /// Construct a minimal configuration, used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            scale_host: default_scale_host(),
            scale_port: default_scale_port(),
            scale_unit_id: default_scale_unit_id(),
            scale_timeout_secs: default_scale_timeout_secs(),
            scale_poll_interval_millis: default_scale_poll_interval_millis(),
            event_queue_size: default_event_queue_size(),
            event_fanout_capacity: default_event_fanout_capacity(),
            cors_allowed_origins: None,
            cors_allow_credentials: false,
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn scale_timeout(&self) -> Duration {
        Duration::from_secs(self.scale_timeout_secs)
    }

    pub fn scale_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scale_poll_interval_millis)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("microdose_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://microdose.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_is_valid() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scale_timeout(), Duration::from_secs(3));
        assert!(!cfg.is_development());
    }

    #[test]
    fn out_of_range_scale_timeout_is_rejected() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        cfg.scale_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
