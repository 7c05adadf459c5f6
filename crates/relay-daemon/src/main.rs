//! relay-daemon
//!
//! Process entry point: parse flags, load config, stand up the logger, wire
//! the Postgres pool and Kafka producer into a `RelayService`, fan that out
//! into shard tasks via the Router, hand them to the Runner, then wait for
//! a termination signal and shut down cleanly.

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use relay_broker::KafkaBroker;
use relay_config::LoggingConfig;
use relay_repository::PgRepository;
use relay_router::route;
use relay_runner::{RepeatPolicy, Runner};
use relay_service::RelayService;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
struct Args {
    #[arg(long, default_value = "configs/application.yml")]
    config_path: String,
}

#[tokio::main]
async fn main() {
    let start = Instant::now();
    if let Err(e) = run(start).await {
        eprintln!("relay-daemon: fatal: {e:?}");
        std::process::exit(1);
    }
}

async fn run(start: Instant) -> anyhow::Result<()> {
    // Optional: secrets such as datasource.password may be supplied via the
    // environment instead of committed to the config file.
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();

    let cfg = relay_config::load(&args.config_path)
        .with_context(|| format!("loading config from {}", args.config_path))?;

    let _log_guard = init_tracing(&cfg.logging).context("initialising logger")?;

    info!(config_path = %args.config_path, "relay-daemon starting");

    let pool = relay_repository::connect(&cfg.datasource)
        .await
        .context("connecting to datasource")?;
    let repository = Arc::new(PgRepository::new(cfg.datasource.schema.clone()));
    let broker = Arc::new(KafkaBroker::build(&cfg.kafka).context("building kafka producer")?);
    let service = Arc::new(RelayService::new(pool, repository, broker));

    let handlers = route(service, &cfg.tasks).context("building shard tasks")?;
    info!(shard_count = handlers.len(), "router - shard tasks built");

    let policy = RepeatPolicy {
        initial_interval_ms: cfg.runner.repeat_policy.initial_interval,
        max_interval_ms: cfg.runner.repeat_policy.max_interval,
        backoff_coefficient: cfg.runner.repeat_policy.backoff_coefficient,
    };
    let mut runner = Runner::new(policy, cfg.runner.effective_max_workers());
    runner.run_tasks(handlers);

    wait_for_shutdown_signal().await;
    info!("relay-daemon received shutdown signal, stopping runner");
    runner.stop().await;

    info!(uptime_secs = start.elapsed().as_secs_f64(), "relay-daemon resource usage");
    info!("relay-daemon stopped cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Returns a writer guard that must be kept alive for the duration of the
/// process when logging to a file (dropping it would stop flushing).
fn init_tracing(cfg: &LoggingConfig) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_new(cfg.level.root.to_lowercase())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if cfg.file.name.is_empty() {
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        builder.init();
        return Ok(None);
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.file.name)
        .with_context(|| format!("opening log file {}", cfg.file.name))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    if cfg.file.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
    }

    Ok(Some(guard))
}

