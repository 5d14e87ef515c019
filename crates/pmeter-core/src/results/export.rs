use std::path::{Path, PathBuf};

use regex::Regex;

use super::RunSummary;
use crate::config::SummaryOutput;
use crate::error::PmeterError;

// ---------------------------------------------------------------------------
// Output path selection
// ---------------------------------------------------------------------------

/// Pick `<dir>/<prefix><N>.json` where N is one more than the largest suffix
/// already present in `dir` (1 when there is none). The directory is created
/// if it does not exist.
pub async fn next_numbered_path(dir: &Path, prefix: &str) -> Result<PathBuf, PmeterError> {
    tokio::fs::create_dir_all(dir).await?;

    let pattern = Regex::new(&format!(r"^{}(\d+)\.json$", regex::escape(prefix)))
        .map_err(|e| PmeterError::Internal(format!("summary file pattern: {e}")))?;

    let mut highest: u64 = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(n) = pattern
            .captures(name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }

    let next = highest.checked_add(1).ok_or_else(|| {
        PmeterError::Internal(format!(
            "no summary number left after {prefix}{highest}.json in {}",
            dir.display()
        ))
    })?;
    Ok(dir.join(format!("{prefix}{next}.json")))
}

/// Resolve the concrete file a summary should be written to.
pub async fn resolve_output_path(output: &SummaryOutput) -> Result<PathBuf, PmeterError> {
    match output {
        SummaryOutput::Numbered { dir, prefix } => next_numbered_path(dir, prefix).await,
        SummaryOutput::Fixed { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Ok(path.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// JSON export
// ---------------------------------------------------------------------------

/// Export a summary as pretty-printed JSON (2-space indent, UTF-8, non-ASCII
/// kept verbatim).
pub fn export_json(summary: &RunSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}

/// Serialize `summary` and write it to the location chosen by `output`.
pub async fn write_summary(
    summary: &RunSummary,
    output: &SummaryOutput,
) -> Result<PathBuf, PmeterError> {
    let content = export_json(summary)?;
    let path = resolve_output_path(output).await?;
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Text rendition
// ---------------------------------------------------------------------------

/// Condensed human-readable rendition of a summary for the log.
///
/// Only the first line of each pattern's sample is shown.
pub fn render_text(summary: &RunSummary) -> String {
    let t = &summary.response_times;
    let mut out = String::new();

    out.push_str("Test Summary for Response Patterns\n");
    out.push_str("======================================\n");
    out.push_str(&format!("Query: {}\n", summary.query));
    out.push_str(&format!(
        "Started: {}  Finished: {}  ({:.1}s)\n",
        summary.test_start_time, summary.test_end_time, summary.duration_secs
    ));
    out.push_str(&format!(
        "Requests: {}  Failures: {}  Unique patterns: {}\n",
        summary.total_requests, summary.total_failures, summary.total_unique_patterns
    ));
    out.push_str(&format!(
        "Response time: mean {:.2}ms  median {:.2}ms  p95 {}ms  min {}ms  max {}ms\n",
        t.mean_ms, t.median_ms, t.p95_ms, t.min_ms, t.max_ms
    ));

    for p in &summary.patterns {
        let sample = serde_json::to_string_pretty(&p.response_sample).unwrap_or_default();
        let first_line = sample.lines().next().unwrap_or_default();
        out.push('\n');
        out.push_str(&format!("{} [{}]\n", p.label, p.key));
        out.push_str(&format!("   Count: {} times ({})\n", p.count, p.percentage));
        out.push_str(&format!("   Mean response: {:.2}ms\n", p.mean_response_ms));
        out.push_str(&format!(
            "   First Seen: {}\n",
            p.first_seen.as_deref().unwrap_or("N/A")
        ));
        out.push_str(&format!(
            "   Last Seen: {}\n",
            p.last_seen.as_deref().unwrap_or("N/A")
        ));
        if p.error_count > 0 {
            out.push_str(&format!("   Errors: {}\n", p.error_count));
            for e in &p.recent_errors {
                out.push_str(&format!("     - {e}\n"));
            }
        }
        out.push_str(&format!("   Sample Response: {first_line}...\n"));
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
