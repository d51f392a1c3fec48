use serde::{Deserialize, Serialize};

/// Pipeline stage configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StageConfig {
    /// Capacity of the channel each stage writes to.
    ///
    /// Zero (the default) makes every hand-off between stages synchronous, so a slow consumer
    /// immediately throttles its producer.
    #[serde(default)]
    pub capacity: usize,
}
