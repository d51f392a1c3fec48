use serde::{Deserialize, Serialize};

/// Serializing service configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Number of requests that can wait in the service inbox.
    ///
    /// Zero (the default) makes every request a handshake with the service loop.
    #[serde(default)]
    pub request_capacity: usize,
}
