use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pattern::KeyMode;

// ---------------------------------------------------------------------------
// LoopCount
// ---------------------------------------------------------------------------

/// How long each virtual user keeps iterating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopCount {
    /// Run a fixed number of iterations per virtual user.
    Finite { count: u64 },
    /// Run for a fixed wall-clock duration in seconds.
    Duration { seconds: u64 },
    /// Run forever until explicitly stopped.
    Infinite,
}

impl Default for LoopCount {
    fn default() -> Self {
        Self::Duration { seconds: 60 }
    }
}

// ---------------------------------------------------------------------------
// SummaryOutput
// ---------------------------------------------------------------------------

/// Where the end-of-run summary is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryOutput {
    /// `<dir>/<prefix><N>.json`, where N is one past the highest existing suffix.
    Numbered { dir: PathBuf, prefix: String },
    /// A fixed path that is overwritten on every run.
    Fixed { path: PathBuf },
}

pub const DEFAULT_SUMMARY_PREFIX: &str = "performance_summary";
pub const DEFAULT_FIXED_SUMMARY_FILE: &str = "response_patterns_summary.json";

impl Default for SummaryOutput {
    fn default() -> Self {
        Self::Numbered {
            dir: PathBuf::from("."),
            prefix: DEFAULT_SUMMARY_PREFIX.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadConfig
// ---------------------------------------------------------------------------

/// Complete run-time configuration of a load test.
///
/// Every field has a default, so a config file only needs to list the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LoadConfig {
    /// Scheme and authority of the system under test, without a trailing path.
    pub base_url: String,
    pub search_path: String,
    pub health_path: String,
    /// Search term sent as the `query` parameter on every search request.
    pub query: String,
    pub limit: u32,
    pub offset: u32,
    /// Number of concurrent virtual users.
    pub users: u32,
    /// Time in seconds to ramp all users up.
    pub ramp_up_seconds: u32,
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,
    pub loop_count: LoopCount,
    /// Relative weight of the search task when a user picks its next task.
    pub search_weight: u32,
    /// Relative weight of the health-check task; `0` disables it.
    pub health_weight: u32,
    /// Requests slower than this are failures even when the status is 2xx.
    pub failure_threshold_ms: u64,
    /// Hard transport timeout applied by the HTTP client.
    pub request_timeout_ms: u64,
    pub key_mode: KeyMode,
    pub output: SummaryOutput,
    pub progress_interval_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085".to_string(),
            search_path: "/api/v1/search".to_string(),
            health_path: "/health".to_string(),
            query: "병점 맛집".to_string(),
            limit: 10,
            offset: 0,
            users: 10,
            ramp_up_seconds: 0,
            think_time_min_ms: 1000,
            think_time_max_ms: 1000,
            loop_count: LoopCount::default(),
            search_weight: 1,
            health_weight: 1,
            failure_threshold_ms: 15_000,
            request_timeout_ms: 30_000,
            key_mode: KeyMode::default(),
            output: SummaryOutput::default(),
            progress_interval_ms: 5_000,
        }
    }
}

impl LoadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Full URL of the search endpoint, without query parameters.
    pub fn search_url(&self) -> String {
        join_url(&self.base_url, &self.search_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.base_url, &self.health_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
