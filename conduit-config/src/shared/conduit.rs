use serde::{Deserialize, Serialize};

use crate::shared::{PoolConfig, ServiceConfig, StageConfig, ValidationError};

/// Top-level configuration grouping every component.
///
/// Every section is optional in configuration files and falls back to its defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConduitConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Pipeline stage settings.
    #[serde(default)]
    pub stage: StageConfig,
    /// Serializing service settings.
    #[serde(default)]
    pub service: ServiceConfig,
}

impl ConduitConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pool.validate()
    }
}
