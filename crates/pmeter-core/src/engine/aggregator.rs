use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{LoadConfig, SummaryOutput};
use crate::engine::stats::{mean, median, percentile};
use crate::error::PmeterError;
use crate::pattern::{self, canonical_json, preview, KeyMode, PatternKey};
use crate::results::export::{render_text, write_summary};
use crate::results::{
    format_local, GlobalStats, Outcome, PatternSummary, RequestCompletion, RunReport, RunSummary,
};

/// Number of error messages retained per pattern.
pub const MAX_ERROR_MESSAGES: usize = 5;
/// Error messages are cut to this many characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 256;

const KEY_PREVIEW_CHARS: usize = 30;
const BODY_PREVIEW_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Per-request success/failure decision handed back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure { message: String },
}

impl Verdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Failure { .. })
    }

    /// Judge a request without looking at its body: slow, non-2xx and
    /// transport-failed requests fail.
    pub fn for_transport(event: &RequestCompletion, failure_threshold_ms: u64) -> Self {
        let failure = match &event.outcome {
            Outcome::Failed { category, message } => Some(format!("{category} error: {message}")),
            Outcome::Response { status, .. } if !(200..300).contains(status) => {
                Some(format!("HTTP {status}"))
            }
            Outcome::Response { .. } => None,
        };
        Self::combine(event.elapsed_ms, failure_threshold_ms, failure)
    }

    fn combine(elapsed_ms: u64, failure_threshold_ms: u64, failure: Option<String>) -> Self {
        let mut messages = Vec::new();
        if elapsed_ms > failure_threshold_ms {
            messages.push(format!(
                "timeout exceeded: {elapsed_ms}ms > {failure_threshold_ms}ms"
            ));
        }
        messages.extend(failure);
        if messages.is_empty() {
            Verdict::Success
        } else {
            Verdict::Failure {
                message: clip_message(messages.join("; ")),
            }
        }
    }
}

/// Limit `message` to [`MAX_ERROR_MESSAGE_LEN`] characters, ellipsis included.
fn clip_message(message: String) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        message
    } else {
        preview(&message, MAX_ERROR_MESSAGE_LEN - 1)
    }
}

// ---------------------------------------------------------------------------
// PatternRecord
// ---------------------------------------------------------------------------

/// Accumulated statistics for one pattern key.
#[derive(Debug, Clone)]
pub struct PatternRecord {
    count: u64,
    first_seen: Option<DateTime<Local>>,
    last_seen: Option<DateTime<Local>>,
    sample: Value,
    elapsed_ms: Vec<u64>,
    error_count: u64,
    errors: VecDeque<String>,
}

impl PatternRecord {
    fn new(sample: Value) -> Self {
        Self {
            count: 0,
            first_seen: None,
            last_seen: None,
            sample,
            elapsed_ms: Vec::new(),
            error_count: 0,
            errors: VecDeque::with_capacity(MAX_ERROR_MESSAGES),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn first_seen(&self) -> Option<DateTime<Local>> {
        self.first_seen
    }

    pub fn last_seen(&self) -> Option<DateTime<Local>> {
        self.last_seen
    }

    pub fn sample(&self) -> &Value {
        &self.sample
    }

    pub fn elapsed_ms(&self) -> &[u64] {
        &self.elapsed_ms
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Retained error messages, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    fn push_error(&mut self, message: String) {
        self.error_count += 1;
        if self.errors.len() == MAX_ERROR_MESSAGES {
            self.errors.pop_front();
        }
        self.errors.push_back(message);
    }
}

// ---------------------------------------------------------------------------
// PatternAggregator
// ---------------------------------------------------------------------------

/// Settings the aggregator needs from the run configuration.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub query: String,
    pub key_mode: KeyMode,
    pub failure_threshold_ms: u64,
    /// Route whose responses are clustered; other routes are only judged.
    pub tracked_route: String,
}

impl AggregatorSettings {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            query: config.query.clone(),
            key_mode: config.key_mode,
            failure_threshold_ms: config.failure_threshold_ms,
            tracked_route: config.search_path.clone(),
        }
    }
}

/// Clusters response bodies of one run into patterns and produces the
/// end-of-run summary.
///
/// One aggregator belongs to one run. The engine holds it behind an
/// `Arc<RwLock<_>>`; every mutation goes through `&mut self`, so concurrent
/// completions are serialized by the write lock.
pub struct PatternAggregator {
    settings: AggregatorSettings,
    run_id: Uuid,
    started_at: DateTime<Local>,
    /// Records in first-seen order.
    records: Vec<(PatternKey, PatternRecord)>,
    index: HashMap<PatternKey, usize>,
    total_requests: u64,
    total_failures: u64,
    /// All elapsed times across every pattern, in arrival order.
    response_times: Vec<u64>,
}

impl PatternAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            settings,
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            records: Vec::new(),
            index: HashMap::new(),
            total_requests: 0,
            total_failures: 0,
            response_times: Vec::new(),
        }
    }

    /// Whether completions for `route` feed the pattern table.
    pub fn tracks(&self, route: &str) -> bool {
        route == self.settings.tracked_route
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Reset all state for a new run starting at `started_at`.
    pub fn on_run_start(&mut self, started_at: DateTime<Local>) {
        self.run_id = Uuid::new_v4();
        self.started_at = started_at;
        self.records.clear();
        self.index.clear();
        self.total_requests = 0;
        self.total_failures = 0;
        self.response_times.clear();
        tracing::info!(
            run_id = %self.run_id,
            route = %self.settings.tracked_route,
            key_mode = %self.settings.key_mode,
            "Response pattern tracking started"
        );
    }

    /// Record one completed request and return its verdict.
    pub fn on_request_complete(&mut self, event: &RequestCompletion) -> Verdict {
        let classified = pattern::classify(&event.outcome, self.settings.key_mode);
        let now = event.completed_at;

        let idx = match self.index.get(&classified.key) {
            Some(&idx) => idx,
            None => {
                tracing::info!(
                    key = %preview(classified.key.as_str(), KEY_PREVIEW_CHARS),
                    route = %event.name,
                    sample = %preview(&canonical_json(&classified.sample), BODY_PREVIEW_CHARS),
                    "New response pattern found"
                );
                self.records
                    .push((classified.key.clone(), PatternRecord::new(classified.sample)));
                self.index.insert(classified.key.clone(), self.records.len() - 1);
                self.records.len() - 1
            }
        };

        let verdict = Verdict::combine(
            event.elapsed_ms,
            self.settings.failure_threshold_ms,
            classified.failure,
        );

        let record = &mut self.records[idx].1;
        record.count += 1;
        record.first_seen = Some(record.first_seen.map_or(now, |t| t.min(now)));
        record.last_seen = Some(record.last_seen.map_or(now, |t| t.max(now)));
        record.elapsed_ms.push(event.elapsed_ms);

        self.total_requests += 1;
        self.response_times.push(event.elapsed_ms);

        if let Verdict::Failure { message } = &verdict {
            tracing::warn!(
                route = %event.name,
                key = %preview(classified.key.as_str(), KEY_PREVIEW_CHARS),
                elapsed_ms = event.elapsed_ms,
                "Request failed: {message}"
            );
            record.push_error(message.clone());
            self.total_failures += 1;
        }

        verdict
    }

    /// Summarize the run, log the rendition, and write the summary file.
    ///
    /// Returns `Ok(None)` without touching the filesystem when nothing was
    /// recorded.
    pub async fn on_run_end(
        &self,
        ended_at: DateTime<Local>,
        output: &SummaryOutput,
    ) -> Result<Option<RunReport>, PmeterError> {
        let Some(summary) = self.summarize(ended_at) else {
            tracing::info!("No search responses collected for pattern analysis; no summary written");
            return Ok(None);
        };

        for line in render_text(&summary).lines() {
            tracing::info!("{line}");
        }

        match write_summary(&summary, output).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Response patterns summary saved");
                Ok(Some(RunReport { path, summary }))
            }
            Err(e) => {
                tracing::error!("Failed to write response patterns summary: {e}");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn unique_patterns(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, key: &PatternKey) -> Option<&PatternRecord> {
        self.index.get(key).map(|&idx| &self.records[idx].1)
    }

    /// Records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = (&PatternKey, &PatternRecord)> {
        self.records.iter().map(|(k, r)| (k, r))
    }

    /// Build the summary for a run ending at `ended_at`, or `None` when no
    /// request was recorded. Deterministic for a given state and end time.
    pub fn summarize(&self, ended_at: DateTime<Local>) -> Option<RunSummary> {
        if self.total_requests == 0 {
            return None;
        }
        let total = self.total_requests;

        let mut sorted = self.response_times.clone();
        sorted.sort_unstable();
        let response_times = GlobalStats {
            mean_ms: mean(&sorted),
            median_ms: median(&sorted),
            p95_ms: percentile(&sorted, 95.0),
            min_ms: sorted.first().copied().unwrap_or(0),
            max_ms: sorted.last().copied().unwrap_or(0),
        };

        let patterns = self
            .records
            .iter()
            .enumerate()
            .map(|(i, (key, record))| PatternSummary {
                label: format!("Pattern {}", i + 1),
                key: key.to_string(),
                count: record.count,
                percentage: percentage(record.count, total),
                mean_response_ms: mean(&record.elapsed_ms),
                first_seen: record.first_seen.as_ref().map(format_local),
                last_seen: record.last_seen.as_ref().map(format_local),
                error_count: record.error_count,
                recent_errors: record.errors.iter().cloned().collect(),
                response_sample: record.sample.clone(),
            })
            .collect::<Vec<_>>();

        let duration_secs =
            (ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        Some(RunSummary {
            run_id: self.run_id,
            query: self.settings.query.clone(),
            key_mode: self.settings.key_mode,
            test_start_time: format_local(&self.started_at),
            test_end_time: format_local(&ended_at),
            duration_secs,
            total_requests: total,
            total_failures: self.total_failures,
            total_unique_patterns: patterns.len(),
            response_times,
            patterns,
        })
    }
}

fn percentage(count: u64, total: u64) -> String {
    if total == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", count as f64 / total as f64 * 100.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
