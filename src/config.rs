//! Configuration for the planning engine and the job scheduler.
//!
//! All sections have serde defaults so an empty file (or no file at all) is a
//! valid configuration. Values load from an optional TOML/JSON/YAML file plus
//! `TESSERA_*` environment overrides.

use crate::error::ConfigError;
use crate::job::scheduler::SchedulerConfig;
use crate::logging::LoggingConfig;
use crate::plan::executor::ExecutorConfig;
use crate::plan::resolver::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    /// Job scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Plan resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Plan executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TesseraConfig {
    /// Load configuration from an optional file, then apply environment
    /// overrides (`TESSERA_SCHEDULER__LOG_TAIL_SIZE=200` style).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
