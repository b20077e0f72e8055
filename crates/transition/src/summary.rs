//! Reporting of transition progress

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of a finished transition, for logging
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Wire form of the state transitioned from
    pub prev_cluster_state: String,
    /// Wire form of the state transitioned to
    pub new_cluster_state: String,
    /// Time from construction until the summary was taken
    pub processing_time: Duration,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' -> '{}' in {} ms",
            self.prev_cluster_state,
            self.new_cluster_state,
            self.processing_time.as_millis()
        )
    }
}

/// Something that can describe its current state for admin pages and logs
pub trait StatusReporter {
    /// Structured snapshot of the current state
    fn status_report(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = Summary {
            prev_cluster_state: "version:1 storage:2".to_string(),
            new_cluster_state: "version:2 storage:2 .1.s:d".to_string(),
            processing_time: Duration::from_micros(12_500),
        };

        assert_eq!(
            summary.to_string(),
            "'version:1 storage:2' -> 'version:2 storage:2 .1.s:d' in 12 ms"
        );
    }
}
