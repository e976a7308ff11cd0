use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use scout_api::{observability::LogConfig, RunLimits};
use scout_workflow::{DriverSettings, ProviderSettings};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log: LogConfig,
    pub provider: ProviderSettings,
    pub driver: DriverSettings,
    pub limits: RunLimits,
    /// How long finished pipelines stay pollable.
    pub retention_minutes: u64,
    pub eviction_interval_secs: u64,
}

impl ServerConfig {
    /// `config/default.*`, then `config/local.*`, then `SCOUT__*` variables.
    pub fn load() -> Result<Self> {
        Self::load_with(Environment::with_prefix("SCOUT").separator("__"))
    }

    fn load_with(env: Environment) -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(env.try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(Duration::from_secs(self.retention_minutes.saturating_mul(60)))
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log: LogConfig::default(),
            provider: ProviderSettings::default(),
            driver: DriverSettings::default(),
            limits: RunLimits::default(),
            retention_minutes: 60,
            eviction_interval_secs: 60,
        }
    }
}
