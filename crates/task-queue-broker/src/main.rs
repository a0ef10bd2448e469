use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use task_queue_broker::{Broker, BrokerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tq-broker")]
#[command(about = "Reference task queue broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Prometheus metrics port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = BrokerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if args.metrics_port.is_some() {
        config.monitoring.metrics_port = args.metrics_port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));
    let subscriber = tracing_subscriber::registry().with(filter);
    if config.monitoring.log_format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(false)).init();
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    if let Some(metrics_port) = config.monitoring.metrics_port {
        let metrics_broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_broker, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            signal_broker.shutdown();
        }
    });

    broker.run().await?;

    Ok(())
}

async fn start_metrics_server(broker: Arc<Broker>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(broker): State<Arc<Broker>>) -> (StatusCode, String) {
        let metrics = broker.metrics();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&metrics.registry.gather(), &mut buffer) {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(broker);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
