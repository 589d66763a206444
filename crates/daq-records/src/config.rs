//! Configuration using Figment.
//!
//! Settings are loaded from:
//! 1. `config/records.toml` (or a given path)
//! 2. Environment variables prefixed with `DAQ_RECORDS_`, nested with `__`
//!
//! # Example
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [network]
//! timeout_ms = 2000
//!
//! [[records]]
//! name = "theta"
//! driver = "soft_motor"
//! fields = { scale = 0.001, positive_limit = 90.0, negative_limit = -90.0 }
//! ```
//!
//! ```rust,ignore
//! let settings = Settings::load()?;
//! logging::init(&settings.logging)?;
//! let database = settings.build_database(&registry)?;
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::database::Database;
use crate::driver::DriverRegistry;
use crate::error::ConfigError;
use crate::logging::LoggingConfig;

/// Already-validated description of one record: its name, driver type and
/// field values. Fields not given take their table defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDescription {
    /// Unique record name.
    pub name: String,
    /// Driver type.
    pub driver: String,
    /// Field values by name.
    #[serde(default)]
    pub fields: toml::Table,
}

impl RecordDescription {
    /// Description with no field values.
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            fields: toml::Table::new(),
        }
    }

    /// Set one field value.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

/// Defaults for network server connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// RPC timeout in milliseconds, used when a server record gives none.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Poll interval while waiting for a reply, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl NetworkSettings {
    /// RPC timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Network defaults.
    #[serde(default)]
    pub network: NetworkSettings,
    /// Record descriptions.
    #[serde(default)]
    pub records: Vec<RecordDescription>,
}

impl Settings {
    /// Load from `config/records.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/records.toml")
    }

    /// Load from a specific file and the environment.
    ///
    /// Environment variables override the file, e.g.
    /// `DAQ_RECORDS_LOGGING__LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_RECORDS_").split("__"))
            .extract()?;
        settings.validate()?;
        info!(
            path = %path.as_ref().display(),
            records = settings.records.len(),
            "configuration loaded"
        );
        Ok(settings)
    }

    /// Check settings that serde cannot: record names unique and non-empty,
    /// a known log level, and a non-zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate().map_err(ConfigError::Invalid)?;
        if self.network.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.timeout_ms must be greater than zero".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for record in &self.records {
            if record.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "record with driver '{}' has an empty name",
                    record.driver
                )));
            }
            if !names.insert(record.name.as_str()) {
                return Err(ConfigError::DuplicateRecord {
                    record: record.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build and initialize a database from the record descriptions.
    pub fn build_database(&self, registry: &DriverRegistry) -> Result<Database, ConfigError> {
        let database = Database::build(registry, &self.records)?;
        database.initialize_all()?;
        Ok(database)
    }
}
