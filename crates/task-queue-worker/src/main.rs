use clap::Parser;
use task_queue_worker::handler::{AddHandler, EchoHandler, FailHandler, LogHandler};
use task_queue_worker::{logging, AckMode, HandlerRegistry, PacingMode, Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "tq-worker")]
#[command(about = "Task queue worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Broker address (host:port)
    #[arg(short, long)]
    broker: Option<String>,

    /// Queue to consume from and publish follow-ups to
    #[arg(short, long)]
    queue: Option<String>,

    /// Maximum unacknowledged deliveries
    #[arg(long)]
    prefetch: Option<u16>,

    /// Deliveries processed in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Consumer tag announced to the broker
    #[arg(long)]
    consumer_tag: Option<String>,

    /// Acknowledge after follow-ups are published instead of on receipt
    #[arg(long)]
    ack_after_finalize: bool,

    /// Disable dot-count pacing
    #[arg(long)]
    no_pacing: bool,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = WorkerConfig::load(args.config.as_deref())?;
    if let Some(broker) = args.broker {
        config.broker.address = broker;
    }
    if let Some(queue) = args.queue {
        config.worker.queue = queue;
    }
    if let Some(prefetch) = args.prefetch {
        config.worker.prefetch_count = prefetch;
    }
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    if args.consumer_tag.is_some() {
        config.worker.consumer_tag = args.consumer_tag;
    }
    if args.ack_after_finalize {
        config.worker.ack_mode = AckMode::AfterFinalize;
    }
    if args.no_pacing {
        config.worker.pacing.mode = PacingMode::None;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    logging::init(&config.logging)?;
    tracing::info!("Starting worker with config: {:?}", config);

    let mut registry = HandlerRegistry::new();
    registry.register("add", AddHandler)?;
    registry.register("echo", EchoHandler)?;
    registry.register("log", LogHandler)?;
    registry.register("fail", FailHandler)?;
    tracing::info!("Registered tasks: {:?}", registry.task_types());

    let worker = Worker::new(config, registry)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            signal.cancel();
        }
    });

    worker.run(shutdown).await?;

    Ok(())
}
