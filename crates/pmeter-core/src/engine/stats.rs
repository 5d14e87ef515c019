use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::aggregator::Verdict;

// ---------------------------------------------------------------------------
// Percentile helpers
// ---------------------------------------------------------------------------

/// Nearest-rank percentile over an ascending slice.
///
/// Index is `ceil(p/100 * n) - 1`, so p95 is the 19th of the 20-quantile cut
/// points. Returns 0 for an empty slice.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

/// Median of an ascending slice; the mean of the two middle values when the
/// length is even.
pub fn median(sorted: &[u64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    }
}

pub fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

// ---------------------------------------------------------------------------
// RunSnapshot / RouteStats
// ---------------------------------------------------------------------------

/// Point-in-time view of the run used for progress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub elapsed_ms: u64,
    pub current_rps: f64,
    pub mean_ms: f64,
    pub p95_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Request/failure accounting for one route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteStats {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub mean_ms: f64,
}

#[derive(Debug, Default)]
struct RouteCounters {
    requests: u64,
    failures: u64,
    sum_ms: u64,
}

// ---------------------------------------------------------------------------
// RunStats
// ---------------------------------------------------------------------------

/// Run-wide request accounting across every route, fed by the verdicts the
/// pattern aggregator hands back.
pub struct RunStats {
    total_requests: u64,
    total_errors: u64,
    response_times: Vec<u64>,
    min_ms: u64,
    max_ms: u64,
    sum_ms: u64,
    start_time: Instant,
    routes: BTreeMap<String, RouteCounters>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            total_errors: 0,
            response_times: Vec::new(),
            min_ms: u64::MAX,
            max_ms: 0,
            sum_ms: 0,
            start_time: Instant::now(),
            routes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, route: &str, elapsed_ms: u64, verdict: &Verdict) {
        let failed = verdict.is_failure();
        self.total_requests += 1;
        if failed {
            self.total_errors += 1;
        }
        self.response_times.push(elapsed_ms);
        self.sum_ms += elapsed_ms;
        self.min_ms = self.min_ms.min(elapsed_ms);
        self.max_ms = self.max_ms.max(elapsed_ms);

        let counters = self.routes.entry(route.to_string()).or_default();
        counters.requests += 1;
        if failed {
            counters.failures += 1;
        }
        counters.sum_ms += elapsed_ms;
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    /// Requests per second averaged over the entire elapsed duration.
    pub fn current_rps(&self) -> f64 {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        if elapsed_secs < 0.001 {
            return 0.0;
        }
        self.total_requests as f64 / elapsed_secs
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let mut sorted = self.response_times.clone();
        sorted.sort_unstable();
        let mean_ms = if self.total_requests > 0 {
            self.sum_ms as f64 / self.total_requests as f64
        } else {
            0.0
        };
        RunSnapshot {
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            current_rps: self.current_rps(),
            mean_ms,
            p95_ms: percentile(&sorted, 95.0),
            min_ms: if self.min_ms == u64::MAX { 0 } else { self.min_ms },
            max_ms: self.max_ms,
        }
    }

    /// Per-route table, sorted by route name.
    pub fn routes(&self) -> Vec<RouteStats> {
        self.routes
            .iter()
            .map(|(name, c)| RouteStats {
                name: name.clone(),
                requests: c.requests,
                failures: c.failures,
                error_rate: if c.requests > 0 {
                    c.failures as f64 / c.requests as f64
                } else {
                    0.0
                },
                mean_ms: if c.requests > 0 {
                    c.sum_ms as f64 / c.requests as f64
                } else {
                    0.0
                },
            })
            .collect()
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
