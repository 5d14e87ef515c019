use crate::config::model::{LoadConfig, LoopCount, SummaryOutput};
use crate::error::PmeterError;

/// Validate a [`LoadConfig`] and return a list of validation errors.
///
/// An empty `Vec` means the config is usable.
pub fn validate_config(config: &LoadConfig) -> Vec<PmeterError> {
    let mut errors = Vec::new();

    let base = config.base_url.trim();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        errors.push(PmeterError::Validation(format!(
            "base_url must start with http:// or https:// (got: {})",
            config.base_url
        )));
    }

    if config.search_path.trim().is_empty() {
        errors.push(PmeterError::Validation(
            "search_path must not be empty".to_string(),
        ));
    }

    if config.query.trim().is_empty() {
        errors.push(PmeterError::Validation(
            "query must not be empty".to_string(),
        ));
    }

    if config.users == 0 {
        errors.push(PmeterError::Validation(
            "users must be at least 1".to_string(),
        ));
    }

    if config.think_time_min_ms > config.think_time_max_ms {
        errors.push(PmeterError::Validation(format!(
            "think_time_min_ms ({}) must not exceed think_time_max_ms ({})",
            config.think_time_min_ms, config.think_time_max_ms
        )));
    }

    if config.search_weight == 0 && config.health_weight == 0 {
        errors.push(PmeterError::Validation(
            "at least one of search_weight and health_weight must be non-zero".to_string(),
        ));
    }

    if config.failure_threshold_ms == 0 {
        errors.push(PmeterError::Validation(
            "failure_threshold_ms must be greater than zero".to_string(),
        ));
    }

    if config.request_timeout_ms == 0 {
        errors.push(PmeterError::Validation(
            "request_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if config.progress_interval_ms == 0 {
        errors.push(PmeterError::Validation(
            "progress_interval_ms must be greater than zero".to_string(),
        ));
    }

    match &config.loop_count {
        LoopCount::Finite { count: 0 } => errors.push(PmeterError::Validation(
            "loop_count.count must be at least 1".to_string(),
        )),
        LoopCount::Duration { seconds: 0 } => errors.push(PmeterError::Validation(
            "loop_count.seconds must be at least 1".to_string(),
        )),
        _ => {}
    }

    match &config.output {
        SummaryOutput::Numbered { prefix, .. } if prefix.trim().is_empty() => {
            errors.push(PmeterError::Validation(
                "output.prefix must not be empty".to_string(),
            ));
        }
        SummaryOutput::Fixed { path } if path.as_os_str().is_empty() => {
            errors.push(PmeterError::Validation(
                "output.path must not be empty".to_string(),
            ));
        }
        _ => {}
    }

    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
