//! Demo runner for the flowgate primitives.
//!
//! `run` wires a queue, a worker pool, an admission controller and an event
//! bus into one pipeline and prints the metrics snapshot once it drains.
//! `check-config` only loads and validates a configuration file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use flowgate::config::{load_config, Config};
use flowgate::logging::init_logging;
use flowgate::metrics;
use flowgate::util::backoff::Backoff;
use flowgate::{AdmissionController, BoxError, CancelToken, EventBus, FlowError, Queue, WorkerPool};

const DEFAULT_CONFIG: &str = "flowgate.toml";

#[derive(Debug, Parser)]
#[command(
    name = "flowgate",
    version,
    about = "Flowgate: queue, worker pool, event bus and admission control demo"
)]
struct Cli {
    /// Config file (overridden by FLOWGATE_CONFIG)
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push items through the full pipeline
    Run {
        /// Number of items to enqueue
        #[arg(short, long, default_value_t = 1_000)]
        items: u64,
        /// Number of distinct admission keys
        #[arg(short, long, default_value_t = 4)]
        tenants: u64,
        /// Give up on an item after this many denied attempts
        #[arg(long, default_value_t = 64)]
        max_attempts: u32,
    },
    /// Load and validate the config file
    CheckConfig,
}

/// Event published for every item a worker finishes.
#[derive(Debug)]
struct Processed {
    item: u64,
    tenant: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let path = std::env::var_os("FLOWGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config);

    let config: Config = load_config(&path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;

    match cli.command {
        Command::CheckConfig => {
            println!("{}: ok", path.display());
            println!("{config:#?}");
            Ok(())
        }
        Command::Run {
            items,
            tenants,
            max_attempts,
        } => run(config, items, tenants.max(1), max_attempts).await,
    }
}

async fn run(config: Config, items: u64, tenants: u64, max_attempts: u32) -> anyhow::Result<()> {
    let queue = config.queue.build::<u64>()?;
    let admission = AdmissionController::new(&config.admission)?;
    let bus: EventBus<Processed> = EventBus::new();
    let cancel = CancelToken::new();

    let evictor = config.admission.idle_timeout().map(|idle| {
        admission.spawn_evictor((idle / 2).max(Duration::from_millis(10)), idle, cancel.clone())
    });

    let completed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&completed);
    bus.subscribe("processed", move |event: Arc<Processed>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(item = event.item, tenant = %event.tenant, "processed");
            Ok::<_, BoxError>(())
        }
    });
    bus.subscribe("rejected", |event: Arc<Processed>| async move {
        warn!(item = event.item, tenant = %event.tenant, "item rejected by admission");
        Ok::<_, BoxError>(())
    });

    let handler_bus = bus.clone();
    let handler_admission = admission.clone();
    let pool = WorkerPool::spawn_with_cancel(
        queue.clone(),
        config.workers.worker_count,
        move |item: u64| {
            let bus = handler_bus.clone();
            let admission = handler_admission.clone();
            async move {
                let tenant = format!("tenant-{}", item % tenants);
                let mut backoff = Backoff::default();
                for _ in 0..max_attempts {
                    match admission.acquire(&tenant) {
                        Ok(_permit) => {
                            tokio::task::yield_now().await;
                            bus.publish("processed", Processed { item, tenant }).await;
                            return Ok::<_, BoxError>(());
                        }
                        Err(denied) => backoff.wait(denied.retry_after).await,
                    }
                }
                bus.publish("rejected", Processed { item, tenant }).await;
                Err(format!("item {item} denied {max_attempts} times").into())
            }
        },
        cancel.clone(),
    )?;

    info!(
        items,
        tenants,
        capacity = ?queue.capacity(),
        policy = %queue.policy(),
        admission = %admission.kind(),
        "pipeline started"
    );

    let fed = feed(&queue, items, &cancel).await;
    let report = pool.join().await;
    cancel.cancel();
    if let Some(handle) = evictor {
        let _ = handle.await;
    }
    fed?;

    let stats = queue.stats();
    info!(
        processed = report.processed(),
        failed = report.failed(),
        dropped_newest = stats.dropped_newest,
        dropped_oldest = stats.dropped_oldest,
        published = completed.load(Ordering::Relaxed),
        "pipeline finished"
    );

    print!("{}", metrics::snapshot());
    Ok(())
}

/// Enqueues `0..items`, then closes the queue whether or not every item
/// made it in.
async fn feed(queue: &Queue<u64>, items: u64, cancel: &CancelToken) -> Result<(), FlowError> {
    let fed = async {
        for item in 0..items {
            queue.enqueue_with_cancel(item, cancel).await?;
        }
        Ok::<(), FlowError>(())
    }
    .await;
    queue.close();
    fed
}
