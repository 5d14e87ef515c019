use serde::{Deserialize, Serialize};

pub mod aggregator;
pub mod executor;
pub mod stats;
pub mod virtual_user;

pub use aggregator::{AggregatorSettings, PatternAggregator, PatternRecord, Verdict};
pub use executor::{run_test, EngineConfig, EngineEvent, EngineHandle};
pub use stats::{RouteStats, RunSnapshot, RunStats};

/// Lifecycle state of a load test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Virtual users are issuing requests.
    Running,
    /// Users have stopped; the summary is being produced.
    Stopping,
    Completed,
    /// The run task died before producing a summary.
    Error,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Running => "running",
            EngineStatus::Stopping => "stopping",
            EngineStatus::Completed => "completed",
            EngineStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde_name() {
        for status in [
            EngineStatus::Running,
            EngineStatus::Stopping,
            EngineStatus::Completed,
            EngineStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn deserialize_invalid_variant_fails() {
        assert!(serde_json::from_str::<EngineStatus>("\"paused\"").is_err());
    }
}
