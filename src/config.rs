use anyhow::Result;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub capacity: CapacityLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Upper bounds for the capacities a template may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CapacityLimits {
    pub max_regular: i32,
    pub max_emergency: i32,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            max_regular: 10,
            max_emergency: 5,
        }
    }
}

impl CapacityLimits {
    pub fn clamp_regular(&self, capacity: i32) -> i32 {
        capacity.clamp(0, self.max_regular.max(0))
    }

    pub fn clamp_emergency(&self, capacity: i32) -> i32 {
        capacity.clamp(0, self.max_emergency.max(0))
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    let limits = CapacityLimits::default();

    Ok(Config::builder()
        .set_default("database.url", "postgres://localhost/office_hours")?
        .set_default("database.max_connections", 5)?
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 6543)?
        .set_default("logging.level", "info")?
        .set_default("capacity.max_regular", limits.max_regular as i64)?
        .set_default("capacity.max_emergency", limits.max_emergency as i64)?)
}

impl Settings {
    /// Loads settings from `office-hours.toml` (if present) and
    /// `OFFICE_HOURS__*` environment variables, in that order of precedence.
    /// A plain `DATABASE_URL` beats both.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(defaults()?
            .add_source(File::with_name("office-hours.toml").required(false))
            .add_source(
                Environment::with_prefix("OFFICE_HOURS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?
            .try_deserialize()?)
    }
}
