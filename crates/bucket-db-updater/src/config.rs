//! Configuration for the bucket database updater

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_transition::TransitionConfig;

/// Configuration for the bucket database updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Settings handed to every transition
    pub transition: TransitionConfig,
    /// How often delayed requests are checked for resending
    pub tick_interval: Duration,
    /// Number of completed transition summaries kept
    pub history_size: usize,
    /// Capacity of the service's inbound channel
    pub channel_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            transition: TransitionConfig::default(),
            tick_interval: Duration::from_millis(50),
            history_size: 10,
            channel_capacity: 256,
        }
    }
}
