use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Number of worker tasks pulling from the shared job queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of jobs that can be queued before `submit` waits.
    ///
    /// Zero makes every submission a handshake with an idle worker.
    #[serde(default = "default_job_capacity")]
    pub job_capacity: usize,
    /// Number of results that can be buffered before workers wait for the coordinator.
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,
}

impl PoolConfig {
    /// Default number of workers.
    pub const DEFAULT_WORKERS: usize = 3;

    /// Default job queue capacity.
    pub const DEFAULT_JOB_CAPACITY: usize = 10;

    /// Default result queue capacity.
    pub const DEFAULT_RESULT_CAPACITY: usize = 10;

    /// Creates a configuration with `workers` workers and default queue capacities.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Validates pool configuration settings.
    ///
    /// Ensures at least one worker is configured.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pool.workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            job_capacity: default_job_capacity(),
            result_capacity: default_result_capacity(),
        }
    }
}

fn default_workers() -> usize {
    PoolConfig::DEFAULT_WORKERS
}

fn default_job_capacity() -> usize {
    PoolConfig::DEFAULT_JOB_CAPACITY
}

fn default_result_capacity() -> usize {
    PoolConfig::DEFAULT_RESULT_CAPACITY
}
