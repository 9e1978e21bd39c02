use std::sync::Arc;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use worker_sim::config::PoolConfig;
use worker_sim::console;
use worker_sim::worker::TaskRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing();

    let config = PoolConfig::from_env()?;

    eprintln!("⚙️  Worker Sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Scratch dir: {}", config.scratch_dir.display());
    eprintln!("   Unit interval: {:?}", config.unit_interval);
    eprintln!("   Type 'help' for commands, 'quit' to exit.\n");

    let stats_interval = config.stats_interval;
    let registry = Arc::new(TaskRegistry::new(config)?);

    // Seed tasks, e.g. WORKER_SIM_TASKS="render:high:cpu,backup:low:io"
    if let Ok(list) = std::env::var("WORKER_SIM_TASKS") {
        for (name, priority, kind) in console::parse_task_list(&list)? {
            registry.add_task(name, priority, kind).await;
        }
    }

    let events_handle = console::spawn_event_logger(&registry);
    let stats_handle = console::spawn_stats_ticker(Arc::clone(&registry), stats_interval);

    tokio::select! {
        result = console::run(Arc::clone(&registry)) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
    }

    stats_handle.abort();
    registry.shutdown().await;
    events_handle.abort();

    let summary = registry.summary().await;
    info!(
        total = summary.total,
        completed = summary.completed,
        stopped = summary.stopped,
        error = summary.error,
        "Worker Sim exited"
    );
    Ok(())
}

fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file, guard) = match std::env::var("WORKER_SIM_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "worker-sim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();

    guard
}
