pub mod export;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pattern::KeyMode;

/// Timestamp format used for every local-time string in a summary.
pub const LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

pub fn format_local(ts: &DateTime<Local>) -> String {
    ts.format(LOCAL_TIME_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// RequestCompletion
// ---------------------------------------------------------------------------

/// Coarse class of a request that produced no HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Connect,
    Request,
    Body,
    Redirect,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Connect => "connect",
            ErrorCategory::Request => "request",
            ErrorCategory::Body => "body",
            ErrorCategory::Redirect => "redirect",
            ErrorCategory::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// What came back from the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// An HTTP response of any status; `body` is decoded as lossy UTF-8.
    Response { status: u16, body: String },
    /// No usable response.
    Failed {
        category: ErrorCategory,
        message: String,
    },
}

/// A single completed request, handed from a virtual user to the
/// aggregation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestCompletion {
    /// Logical route name, e.g. `/api/v1/search`.
    pub name: String,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Local>,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Response-time statistics over every recorded request, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GlobalStats {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PatternSummary {
    /// `Pattern N`, numbered in first-seen order starting at 1.
    pub label: String,
    pub key: String,
    pub count: u64,
    /// Share of all recorded requests, formatted as `"66.67%"`.
    pub percentage: String,
    pub mean_response_ms: f64,
    #[serde(rename = "firstSeen")]
    pub first_seen: Option<String>,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<String>,
    pub error_count: u64,
    /// The most recent failure messages, oldest first.
    pub recent_errors: Vec<String>,
    #[serde(rename = "responseSample")]
    pub response_sample: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub query: String,
    pub key_mode: KeyMode,
    pub test_start_time: String,
    pub test_end_time: String,
    pub duration_secs: f64,
    #[serde(rename = "total_search_requests")]
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_unique_patterns: usize,
    pub response_times: GlobalStats,
    pub patterns: Vec<PatternSummary>,
}

/// A summary together with the file it was written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunReport {
    pub path: PathBuf,
    pub summary: RunSummary,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
