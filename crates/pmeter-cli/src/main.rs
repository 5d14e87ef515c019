use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pmeter_core::config::{read_config, LoadConfig, LoopCount, SummaryOutput};
use pmeter_core::engine::{run_test, EngineConfig, EngineEvent, EngineStatus};
use pmeter_core::pattern::KeyMode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit status after a second Ctrl-C, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyModeArg {
    Canonical,
    Digest,
}

impl From<KeyModeArg> for KeyMode {
    fn from(arg: KeyModeArg) -> Self {
        match arg {
            KeyModeArg::Canonical => KeyMode::Canonical,
            KeyModeArg::Digest => KeyMode::Digest,
        }
    }
}

/// Drive a search API with concurrent virtual users and cluster the
/// responses into patterns.
#[derive(Parser, Debug)]
#[command(name = "pmeter", version)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, short, env = "PMETER_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the system under test
    #[arg(long, env = "PMETER_HOST")]
    host: Option<String>,

    /// Search term sent as the `query` parameter
    #[arg(long, env = "PMETER_QUERY")]
    query: Option<String>,

    /// Number of concurrent virtual users
    #[arg(long, short, env = "PMETER_USERS")]
    users: Option<u32>,

    /// Seconds over which users are started
    #[arg(long, env = "PMETER_RAMP_UP")]
    ramp_up: Option<u32>,

    /// Run for this many seconds
    #[arg(long, short = 't', conflicts_with_all = ["iterations", "forever"])]
    duration: Option<u64>,

    /// Iterations per user
    #[arg(long, short = 'n', conflicts_with = "forever")]
    iterations: Option<u64>,

    /// Run until interrupted
    #[arg(long)]
    forever: bool,

    /// Minimum think time between requests (ms)
    #[arg(long)]
    think_min_ms: Option<u64>,

    /// Maximum think time between requests (ms)
    #[arg(long)]
    think_max_ms: Option<u64>,

    /// Responses slower than this count as failures (ms)
    #[arg(long, env = "PMETER_FAILURE_THRESHOLD_MS")]
    threshold_ms: Option<u64>,

    /// How response bodies are turned into pattern keys
    #[arg(long, value_enum)]
    key_mode: Option<KeyModeArg>,

    /// Directory for auto-numbered summary files
    #[arg(long, conflicts_with = "summary_file")]
    output_dir: Option<PathBuf>,

    /// Write the summary to this fixed path instead
    #[arg(long)]
    summary_file: Option<PathBuf>,

    /// Skip the /health task
    #[arg(long)]
    no_health: bool,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, load: &mut LoadConfig) {
        if let Some(host) = &self.host {
            load.base_url = host.clone();
        }
        if let Some(query) = &self.query {
            load.query = query.clone();
        }
        if let Some(users) = self.users {
            load.users = users;
        }
        if let Some(ramp_up) = self.ramp_up {
            load.ramp_up_seconds = ramp_up;
        }
        if let Some(seconds) = self.duration {
            load.loop_count = LoopCount::Duration { seconds };
        }
        if let Some(count) = self.iterations {
            load.loop_count = LoopCount::Finite { count };
        }
        if self.forever {
            load.loop_count = LoopCount::Infinite;
        }
        if let Some(ms) = self.think_min_ms {
            load.think_time_min_ms = ms;
        }
        if let Some(ms) = self.think_max_ms {
            load.think_time_max_ms = ms;
        }
        if let Some(ms) = self.threshold_ms {
            load.failure_threshold_ms = ms;
        }
        if let Some(mode) = self.key_mode {
            load.key_mode = mode.into();
        }
        if let Some(dir) = &self.output_dir {
            let prefix = match &load.output {
                SummaryOutput::Numbered { prefix, .. } => prefix.clone(),
                SummaryOutput::Fixed { .. } => {
                    pmeter_core::config::model::DEFAULT_SUMMARY_PREFIX.to_string()
                }
            };
            load.output = SummaryOutput::Numbered {
                dir: dir.clone(),
                prefix,
            };
        }
        if let Some(path) = &self.summary_file {
            load.output = SummaryOutput::Fixed { path: path.clone() };
        }
        if self.no_health {
            load.health_weight = 0;
        }
    }
}

/// Cancel the run on the first interrupt. Resolves to `true` when a second
/// interrupt arrives and the process should exit immediately.
async fn watch_interrupts<F, Fut>(mut interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("Interrupt received, stopping virtual users (Ctrl-C again to force exit)");
    cancel.cancel();
    interrupt().await.is_ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut load = match &cli.config {
        Some(path) => read_config(path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?,
        None => LoadConfig::default(),
    };
    cli.apply(&mut load);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&load)?);
        return Ok(());
    }

    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let handle = run_test(EngineConfig { load, event_tx })
        .await
        .context("starting load test")?;

    let cancel = handle.cancel_token.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
            tracing::warn!("Second interrupt received, exiting without a summary");
            std::process::exit(FORCED_EXIT_CODE);
        }
    });

    let mut failed = false;
    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::StatusChange { status } => {
                tracing::debug!(%status, "Engine status changed");
                failed |= status == EngineStatus::Error;
            }
            EngineEvent::Progress {
                snapshot,
                active_users,
                unique_patterns,
            } => {
                tracing::info!(
                    requests = snapshot.total_requests,
                    errors = snapshot.total_errors,
                    users = active_users,
                    patterns = unique_patterns,
                    rps = %format!("{:.1}", snapshot.current_rps),
                    mean_ms = %format!("{:.1}", snapshot.mean_ms),
                    p95_ms = snapshot.p95_ms,
                    "Progress"
                );
            }
            EngineEvent::Complete { report, .. } => match report {
                Some(report) => tracing::info!(
                    path = %report.path.display(),
                    patterns = report.summary.total_unique_patterns,
                    "Load test complete"
                ),
                None => tracing::info!("Load test complete, no summary file written"),
            },
        }
    }

    if failed {
        anyhow::bail!("load test ended abnormally");
    }
    Ok(())
}
