//! Configuration for pending cluster state transitions

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_cluster_state::State;

/// Default delay before a failed bucket info request is sent again
pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_millis(100);

/// Configuration for pending cluster state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Delay before a failed request is resent
    pub resend_delay: Duration,
    /// States in which a storage node can answer bucket info requests
    pub storage_up_states: Vec<State>,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            resend_delay: DEFAULT_RESEND_DELAY,
            storage_up_states: vec![State::Up, State::Retired, State::Initializing],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransitionConfig =
            serde_json::from_str(r#"{"resend_delay":{"secs":1,"nanos":0}}"#).unwrap();

        assert_eq!(config.resend_delay, Duration::from_secs(1));
        assert_eq!(
            config.storage_up_states,
            TransitionConfig::default().storage_up_states
        );
    }
}
