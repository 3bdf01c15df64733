use crate::observability::PersistenceSettings;
use crate::store::{mask_uri_credentials, DatabaseConfig, DEFAULT_SERVICE_NAME};
use serde::{Deserialize, Serialize};
use std::path::Path;

const LOG_FORMATS: &[&str] = &["json", "text", "pretty"];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Raw environment name; normalized when deriving the store config
    pub environment: String,
    pub service_name: String,
    pub version: String,
    /// Store URI; persistence is disabled when unset
    #[serde(alias = "mongodb_uri")]
    pub database_uri: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub verbose_logging: bool,
    /// Required `User-Agent` prefix outside the local environment
    pub user_agent_prefix: Option<String>,
    pub persistence_queue_depth: usize,
    pub persistence_workers: usize,
    pub max_request_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let persistence = PersistenceSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            environment: "development".to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database_uri: None,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            verbose_logging: false,
            user_agent_prefix: None,
            persistence_queue_depth: persistence.queue_depth,
            persistence_workers: persistence.workers,
            max_request_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Body dumps at debug level
    pub fn is_verbose(&self) -> bool {
        self.verbose_logging || self.log_level.trim().eq_ignore_ascii_case("debug")
    }

    pub fn persistence_settings(&self) -> PersistenceSettings {
        PersistenceSettings {
            queue_depth: self.persistence_queue_depth,
            workers: self.persistence_workers,
        }
    }

    pub fn database_config(&self) -> Option<DatabaseConfig> {
        DatabaseConfig::from_settings(self)
    }

    /// Copy safe to print, with store credentials masked
    pub fn masked(&self) -> Self {
        Self {
            database_uri: self.database_uri.as_deref().map(mask_uri_credentials),
            ..self.clone()
        }
    }
}

/// Load `path` (if present) overlaid by process environment variables
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    load_config_with_env(path, config::Environment::default())
}

fn load_config_with_env(
    path: &Path,
    env: config::Environment,
) -> anyhow::Result<GatewayConfig> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(env)
        .build()?;

    let cfg: GatewayConfig = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &GatewayConfig) -> anyhow::Result<()> {
    if cfg.port == 0 {
        anyhow::bail!("Port must be non-zero");
    }

    if cfg.service_name.trim().is_empty() {
        anyhow::bail!("Service name cannot be empty");
    }

    if cfg.persistence_queue_depth == 0 {
        anyhow::bail!("Persistence queue depth must be at least 1");
    }

    if cfg.persistence_workers == 0 {
        anyhow::bail!("At least one persistence worker must be configured");
    }

    if cfg.max_request_body_bytes == 0 {
        anyhow::bail!("Maximum request body size must be non-zero");
    }

    if !LOG_FORMATS.contains(&cfg.log_format.as_str()) {
        anyhow::bail!(
            "Invalid log format '{}', expected one of: {}",
            cfg.log_format,
            LOG_FORMATS.join(", ")
        );
    }

    Ok(())
}
