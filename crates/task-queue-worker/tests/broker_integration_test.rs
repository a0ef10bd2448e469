// End-to-end tests against the reference broker over TCP

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task_queue_broker::{Broker, BrokerConfig};
use task_queue_core::{Kwargs, TaskSignature};
use task_queue_worker::handler::{AddHandler, FailHandler};
use task_queue_worker::{
    AckMode, BrokerClient, Channel, HandlerError, HandlerRegistry, PacingConfig, TaskHandler,
    Worker, WorkerConfig,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_broker() -> (Arc<Broker>, String) {
    let broker = Arc::new(Broker::new(BrokerConfig::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(broker.clone().serve(listener));
    (broker, addr)
}

fn worker_config(addr: &str) -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.broker.address = addr.to_string();
    config.worker.consumer_tag = Some("integration-worker".to_string());
    config.worker.pacing = PacingConfig::disabled();
    config
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Tracks how many handler invocations overlap
struct SlowHandler {
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn run(&self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

/// Records the first argument of every invocation
#[derive(Default)]
struct RecordHandler {
    seen: Mutex<Vec<Value>>,
}

#[async_trait]
impl TaskHandler for RecordHandler {
    async fn run(&self, args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
        self.seen
            .lock()
            .push(args.first().cloned().unwrap_or(Value::Null));
        Ok(Value::Null)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prefetch_bounds_unacked_deliveries() {
    let (broker, addr) = start_broker().await;

    let publisher = BrokerClient::connect(&addr).await.unwrap();
    let body = TaskSignature::new("slow").to_vec().unwrap();
    for _ in 0..20 {
        publisher.publish_to("tasks", body.clone()).await.unwrap();
    }

    let handler = Arc::new(SlowHandler {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
    });
    let mut registry = HandlerRegistry::new();
    registry.register_arc("slow", handler.clone()).unwrap();

    let mut config = worker_config(&addr);
    config.worker.ack_mode = AckMode::AfterFinalize;
    config.worker.prefetch_count = 3;
    config.worker.concurrency = 8;
    let worker = Worker::new(config, registry).unwrap();

    let shutdown = CancellationToken::new();
    let running = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    wait_until(|| handler.completed.load(Ordering::SeqCst) == 20).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    // The last ack is one-way; a round trip orders it before the stats read
    publisher.qos(1).await.unwrap();
    let stats = broker.queue_stats("tasks").unwrap();
    assert_eq!(stats.acked, 20);
    assert_eq!(stats.ready, 0);
    assert!(stats.max_unacked_per_consumer <= 3);
    assert!(handler.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_follow_up_chains_run_end_to_end() {
    let (_broker, addr) = start_broker().await;

    let recorder = Arc::new(RecordHandler::default());
    let mut registry = HandlerRegistry::new();
    registry.register("add", AddHandler).unwrap();
    registry.register("fail", FailHandler).unwrap();
    registry.register_arc("record", recorder.clone()).unwrap();

    let worker = Worker::new(worker_config(&addr), registry).unwrap();
    let shutdown = CancellationToken::new();
    let running = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let publisher = BrokerClient::connect(&addr).await.unwrap();
    let added = TaskSignature::new("add")
        .with_args(vec![json!(2), json!(3)])
        .on_success(TaskSignature::new("record").with_args(vec![json!("add-ok")]))
        .on_error(TaskSignature::new("record").with_args(vec![json!("add-err")]));
    let failed = TaskSignature::new("fail")
        .on_success(TaskSignature::new("record").with_args(vec![json!("fail-ok")]))
        .on_error(TaskSignature::new("record").with_args(vec![json!("fail-err")]));

    publisher.publish_to("tasks", b"not a task".to_vec()).await.unwrap();
    publisher
        .publish_to("tasks", TaskSignature::new("ghost").to_vec().unwrap())
        .await
        .unwrap();
    publisher.publish_to("tasks", added.to_vec().unwrap()).await.unwrap();
    publisher.publish_to("tasks", failed.to_vec().unwrap()).await.unwrap();

    wait_until(|| recorder.seen.lock().len() == 2).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(*recorder.seen.lock(), vec![json!("add-ok"), json!("fail-err")]);
}

#[tokio::test]
async fn test_worker_exits_when_broker_stops() {
    let (broker, addr) = start_broker().await;

    let worker = Worker::new(worker_config(&addr), HandlerRegistry::new()).unwrap();
    let running = tokio::spawn(async move { worker.run(CancellationToken::new()).await });

    // Let the worker subscribe before stopping the broker
    wait_until(|| broker.queue_stats("tasks").map(|s| s.consumers) == Some(1)).await;
    broker.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());
}
