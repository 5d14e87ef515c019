use std::time::Instant;

use chrono::Local;

use crate::config::LoadConfig;
use crate::results::{ErrorCategory, Outcome, RequestCompletion};

/// One request a virtual user can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRequest {
    /// Logical route name used for grouping, e.g. `/api/v1/search`.
    pub name: String,
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl TargetRequest {
    /// `GET {base}/api/v1/search?query=..&limit=..&offset=..`
    pub fn search(config: &LoadConfig) -> Self {
        Self {
            name: config.search_path.clone(),
            url: config.search_url(),
            query: vec![
                ("query".to_string(), config.query.clone()),
                ("limit".to_string(), config.limit.to_string()),
                ("offset".to_string(), config.offset.to_string()),
            ],
        }
    }

    /// `GET {base}/health`
    pub fn health(config: &LoadConfig) -> Self {
        Self {
            name: config.health_path.clone(),
            url: config.health_url(),
            query: Vec::new(),
        }
    }
}

/// Send `req` and time it. Network and body errors never propagate; they
/// become [`Outcome::Failed`].
pub async fn execute(client: &reqwest::Client, req: &TargetRequest) -> RequestCompletion {
    let start = Instant::now();
    let outcome = match send(client, req).await {
        Ok((status, body)) => Outcome::Response { status, body },
        Err(e) => Outcome::Failed {
            category: categorize(&e),
            message: e.to_string(),
        },
    };
    RequestCompletion {
        name: req.name.clone(),
        outcome,
        elapsed_ms: start.elapsed().as_millis() as u64,
        completed_at: Local::now(),
    }
}

async fn send(client: &reqwest::Client, req: &TargetRequest) -> Result<(u16, String), reqwest::Error> {
    let response = client.get(&req.url).query(&req.query).send().await?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}

/// Map a reqwest error onto the category used in `error:<category>` keys.
pub fn categorize(err: &reqwest::Error) -> ErrorCategory {
    if err.is_timeout() {
        ErrorCategory::Timeout
    } else if err.is_connect() {
        ErrorCategory::Connect
    } else if err.is_redirect() {
        ErrorCategory::Redirect
    } else if err.is_body() || err.is_decode() {
        ErrorCategory::Body
    } else if err.is_request() || err.is_builder() {
        ErrorCategory::Request
    } else {
        ErrorCategory::Other
    }
}
