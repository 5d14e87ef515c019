use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::{LoadConfig, LoopCount};
use crate::http::request::{execute, TargetRequest};
use crate::results::RequestCompletion;

// ---------------------------------------------------------------------------
// TaskMix
// ---------------------------------------------------------------------------

/// The weighted set of requests a virtual user chooses from each iteration.
#[derive(Debug, Clone)]
pub struct TaskMix {
    search: TargetRequest,
    health: TargetRequest,
    search_weight: u32,
    health_weight: u32,
}

impl TaskMix {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            search: TargetRequest::search(config),
            health: TargetRequest::health(config),
            search_weight: config.search_weight,
            health_weight: config.health_weight,
        }
    }

    /// Pick the next request proportionally to the configured weights.
    pub fn pick<R: Rng>(&self, rng: &mut R) -> &TargetRequest {
        let total = self.search_weight.saturating_add(self.health_weight);
        if total == 0 || self.health_weight == 0 {
            return &self.search;
        }
        if rng.gen_range(0..total) < self.search_weight {
            &self.search
        } else {
            &self.health
        }
    }
}

// ---------------------------------------------------------------------------
// ThinkTime
// ---------------------------------------------------------------------------

/// Uniformly random pause between two consecutive requests of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl ThinkTime {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            min_ms: config.think_time_min_ms,
            max_ms: config.think_time_max_ms.max(config.think_time_min_ms),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run a single virtual user until its loop count is exhausted or `cancel`
/// fires, sending a [`RequestCompletion`] after every request.
///
/// `LoopCount::Duration` behaves like `Infinite` here; the executor cancels
/// the run when the duration elapses. Cancellation is checked between
/// requests and during think time, never mid-request.
pub async fn run_virtual_user(
    user_id: u32,
    client: Arc<reqwest::Client>,
    tasks: Arc<TaskMix>,
    think_time: ThinkTime,
    loop_count: LoopCount,
    cancel: CancellationToken,
    result_tx: mpsc::Sender<RequestCompletion>,
) {
    let mut rng = StdRng::from_entropy();
    let max_iterations = match loop_count {
        LoopCount::Finite { count } => Some(count),
        LoopCount::Duration { .. } | LoopCount::Infinite => None,
    };

    tracing::debug!(user_id, "Virtual user started");
    let mut iteration: u64 = 0;
    loop {
        if max_iterations.is_some_and(|max| iteration >= max) || cancel.is_cancelled() {
            break;
        }
        iteration += 1;

        let req = tasks.pick(&mut rng);
        let completion = execute(&client, req).await;

        // Receiver dropped: the run is being torn down.
        if result_tx.send(completion).await.is_err() {
            break;
        }

        if max_iterations.is_some_and(|max| iteration >= max) {
            break;
        }

        let pause = think_time.sample(&mut rng);
        if !pause.is_zero() {
            tokio::select! {
                _ = sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
    tracing::debug!(user_id, iterations = iteration, "Virtual user finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn pick_search_only_when_health_disabled() {
        let config = LoadConfig {
            health_weight: 0,
            ..LoadConfig::default()
        };
        let mix = TaskMix::from_config(&config);
        let mut rng = rng();
        for _ in 0..50 {
            assert_eq!(mix.pick(&mut rng).name, "/api/v1/search");
        }
    }

    #[test]
    fn pick_health_only_when_search_disabled() {
        let config = LoadConfig {
            search_weight: 0,
            ..LoadConfig::default()
        };
        let mix = TaskMix::from_config(&config);
        let mut rng = rng();
        for _ in 0..50 {
            assert_eq!(mix.pick(&mut rng).name, "/health");
        }
    }

    #[test]
    fn pick_mixes_both_tasks() {
        let mix = TaskMix::from_config(&LoadConfig::default());
        let mut rng = rng();
        let searches = (0..1000)
            .filter(|_| mix.pick(&mut rng).name == "/api/v1/search")
            .count();
        assert!(searches > 350 && searches < 650, "searches = {searches}");
    }

    #[test]
    fn think_time_fixed_when_bounds_equal() {
        let t = ThinkTime {
            min_ms: 1000,
            max_ms: 1000,
        };
        assert_eq!(t.sample(&mut rng()), Duration::from_secs(1));
    }

    #[test]
    fn think_time_within_bounds() {
        let t = ThinkTime {
            min_ms: 100,
            max_ms: 200,
        };
        let mut rng = rng();
        for _ in 0..100 {
            let d = t.sample(&mut rng);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn think_time_from_config_clamps_inverted_bounds() {
        let config = LoadConfig {
            think_time_min_ms: 500,
            think_time_max_ms: 100,
            ..LoadConfig::default()
        };
        let t = ThinkTime::from_config(&config);
        assert_eq!(t.max_ms, 500);
    }

    #[tokio::test]
    async fn finite_user_stops_after_count() {
        // Closed port: each request fails fast with a connect error.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = LoadConfig {
            base_url: format!("http://{addr}"),
            health_weight: 0,
            ..LoadConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(16);
        run_virtual_user(
            0,
            Arc::new(reqwest::Client::new()),
            Arc::new(TaskMix::from_config(&config)),
            ThinkTime { min_ms: 0, max_ms: 0 },
            LoopCount::Finite { count: 3 },
            CancellationToken::new(),
            tx,
        )
        .await;

        let mut received = 0;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.name, "/api/v1/search");
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test]
    async fn cancelled_user_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(4);
        run_virtual_user(
            0,
            Arc::new(reqwest::Client::new()),
            Arc::new(TaskMix::from_config(&LoadConfig::default())),
            ThinkTime { min_ms: 0, max_ms: 0 },
            LoopCount::Infinite,
            cancel,
            tx,
        )
        .await;
        assert!(rx.recv().await.is_none());
    }
}
