use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_config, LoadConfig, LoopCount};
use crate::engine::aggregator::{AggregatorSettings, PatternAggregator, Verdict};
use crate::engine::stats::{RouteStats, RunSnapshot, RunStats};
use crate::engine::virtual_user::{run_virtual_user, TaskMix, ThinkTime};
use crate::engine::EngineStatus;
use crate::error::PmeterError;
use crate::http::HttpClientBuilder;
use crate::results::{RequestCompletion, RunReport};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// An event emitted by the engine during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Engine lifecycle status changed.
    StatusChange { status: EngineStatus },

    /// Periodic progress snapshot.
    Progress {
        snapshot: RunSnapshot,
        active_users: u32,
        unique_patterns: usize,
    },

    /// Run finished. `report` is `None` when nothing was recorded or the
    /// summary could not be written.
    Complete {
        report: Option<RunReport>,
        routes: Vec<RouteStats>,
    },
}

/// A handle to a running test for inspecting status and stopping it.
pub struct EngineHandle {
    /// Cancel to stop the run gracefully; the summary is still produced.
    pub cancel_token: CancellationToken,
    pub status: Arc<RwLock<EngineStatus>>,
    /// Live pattern table.
    pub patterns: Arc<RwLock<PatternAggregator>>,
    /// Live run-wide accounting.
    pub stats: Arc<RwLock<RunStats>>,
}

impl EngineHandle {
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

/// Configuration passed to [`run_test`].
pub struct EngineConfig {
    pub load: LoadConfig,
    /// Channel sender for engine events. Closed when the run is over.
    pub event_tx: mpsc::Sender<EngineEvent>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Validate the configuration and start the run in a background task.
///
/// Returns an [`EngineHandle`] immediately.
pub async fn run_test(config: EngineConfig) -> Result<EngineHandle, PmeterError> {
    let errors = validate_config(&config.load);
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PmeterError::Validation(joined));
    }

    let client = Arc::new(HttpClientBuilder::from_config(&config.load).build()?);

    let cancel_token = CancellationToken::new();
    let status = Arc::new(RwLock::new(EngineStatus::Running));
    let stats = Arc::new(RwLock::new(RunStats::new()));

    let mut aggregator = PatternAggregator::new(AggregatorSettings::from_config(&config.load));
    aggregator.on_run_start(Local::now());
    let patterns = Arc::new(RwLock::new(aggregator));

    let handle = EngineHandle {
        cancel_token: cancel_token.clone(),
        status: status.clone(),
        patterns: patterns.clone(),
        stats: stats.clone(),
    };

    let _ = config
        .event_tx
        .send(EngineEvent::StatusChange {
            status: EngineStatus::Running,
        })
        .await;

    let run = tokio::spawn(execute_run(
        config.load,
        client,
        config.event_tx.clone(),
        cancel_token,
        status.clone(),
        patterns,
        stats,
    ));
    tokio::spawn(supervise_run(run, config.event_tx, status));

    Ok(handle)
}

// ---------------------------------------------------------------------------
// Internal implementation
// ---------------------------------------------------------------------------

/// Spawn the users, feed every completion through the aggregator, and emit
/// the final summary once all users have exited.
async fn execute_run(
    load: LoadConfig,
    client: Arc<reqwest::Client>,
    event_tx: mpsc::Sender<EngineEvent>,
    cancel_token: CancellationToken,
    status: Arc<RwLock<EngineStatus>>,
    patterns: Arc<RwLock<PatternAggregator>>,
    stats: Arc<RwLock<RunStats>>,
) {
    let (vu_tx, mut vu_rx) = mpsc::channel::<RequestCompletion>(4096);
    let active_users = Arc::new(AtomicU32::new(0));

    tracing::info!(
        users = load.users,
        ramp_up_seconds = load.ramp_up_seconds,
        target = %load.base_url,
        "Load test started"
    );

    // Duration-bound runs end by cancelling every user at the deadline.
    let deadline_task = match load.loop_count {
        LoopCount::Duration { seconds } => {
            let cancel = cancel_token.clone();
            Some(tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(Duration::from_secs(seconds)) => {
                        tracing::info!("Run duration reached, stopping users");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            }))
        }
        _ => None,
    };

    let spawner = {
        let load = load.clone();
        let cancel = cancel_token.clone();
        let active = Arc::clone(&active_users);
        tokio::spawn(async move { spawn_users(load, client, vu_tx, cancel, active).await })
    };

    let progress_task = {
        let stats = Arc::clone(&stats);
        let patterns = Arc::clone(&patterns);
        let tx = event_tx.clone();
        let active = Arc::clone(&active_users);
        let cancel = cancel_token.clone();
        let period = load.progress_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = stats.read().await.snapshot();
                        let unique_patterns = patterns.read().await.unique_patterns();
                        let _ = tx
                            .send(EngineEvent::Progress {
                                snapshot,
                                active_users: active.load(Ordering::Relaxed),
                                unique_patterns,
                            })
                            .await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    };

    // Aggregation loop. Ends when every user has dropped its sender.
    let threshold = load.failure_threshold_ms;
    while let Some(event) = vu_rx.recv().await {
        let verdict = {
            let mut agg = patterns.write().await;
            if agg.tracks(&event.name) {
                agg.on_request_complete(&event)
            } else {
                Verdict::for_transport(&event, threshold)
            }
        };
        stats
            .write()
            .await
            .record(&event.name, event.elapsed_ms, &verdict);
    }

    // All users have exited and the channel is drained.
    let _ = spawner.await;
    progress_task.abort();
    // Wait for the abort to land so no progress event trails `Complete`.
    let _ = progress_task.await;
    if let Some(task) = deadline_task {
        task.abort();
    }

    set_status(&event_tx, &status, EngineStatus::Stopping).await;

    let report = match patterns
        .read()
        .await
        .on_run_end(Local::now(), &load.output)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Run finished without a summary file: {e}");
            None
        }
    };

    let routes = stats.read().await.routes();
    for route in &routes {
        tracing::info!(
            route = %route.name,
            requests = route.requests,
            failures = route.failures,
            error_rate = %format!("{:.2}%", route.error_rate * 100.0),
            mean_ms = %format!("{:.2}", route.mean_ms),
            "Route totals"
        );
    }

    set_status(&event_tx, &status, EngineStatus::Completed).await;
    let _ = event_tx.send(EngineEvent::Complete { report, routes }).await;
}

/// Start `load.users` virtual users, staggered over the ramp-up period, and
/// wait for all of them to finish.
async fn spawn_users(
    load: LoadConfig,
    client: Arc<reqwest::Client>,
    vu_tx: mpsc::Sender<RequestCompletion>,
    cancel: CancellationToken,
    active_users: Arc<AtomicU32>,
) {
    let ramp_delay = if load.ramp_up_seconds > 0 && load.users > 1 {
        Duration::from_millis(
            (load.ramp_up_seconds as u64 * 1000) / (load.users as u64 - 1).max(1),
        )
    } else {
        Duration::ZERO
    };

    let tasks = Arc::new(TaskMix::from_config(&load));
    let think_time = ThinkTime::from_config(&load);
    let mut users: JoinSet<()> = JoinSet::new();

    for user_id in 0..load.users {
        if cancel.is_cancelled() {
            break;
        }
        if user_id > 0 && !ramp_delay.is_zero() {
            tokio::select! {
                _ = sleep(ramp_delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        let client = Arc::clone(&client);
        let tasks = Arc::clone(&tasks);
        let tx = vu_tx.clone();
        let cancel = cancel.clone();
        let loop_count = load.loop_count.clone();
        let active = Arc::clone(&active_users);

        active_users.fetch_add(1, Ordering::Relaxed);
        users.spawn(async move {
            run_virtual_user(user_id, client, tasks, think_time, loop_count, cancel, tx).await;
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }

    // Only the users' clones keep the channel open from here on.
    drop(vu_tx);
    while users.join_next().await.is_some() {}
}

/// Wait for the run task and flag the engine as failed if it died without
/// reaching `Completed`.
async fn supervise_run(
    run: JoinHandle<()>,
    tx: mpsc::Sender<EngineEvent>,
    status: Arc<RwLock<EngineStatus>>,
) {
    if let Err(join_err) = run.await {
        let err = PmeterError::Engine(format!("run task ended abnormally: {join_err}"));
        tracing::error!("{err}");
        set_status(&tx, &status, EngineStatus::Error).await;
    }
}

async fn set_status(
    tx: &mpsc::Sender<EngineEvent>,
    status: &Arc<RwLock<EngineStatus>>,
    next: EngineStatus,
) {
    {
        let mut s = status.write().await;
        *s = next.clone();
    }
    let _ = tx.send(EngineEvent::StatusChange { status: next }).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
