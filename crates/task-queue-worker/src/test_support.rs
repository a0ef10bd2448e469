//! In-memory fakes for the broker boundary and handlers

use crate::broker::{Acknowledger, Channel, Delivery, DeliveryStream, Publisher};
use crate::error::{BrokerError, HandlerError};
use crate::handler::TaskHandler;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use task_queue_core::{Kwargs, TaskSignature};

/// Ordered record of side effects across fakes
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

struct LoggingAcker {
    log: Arc<EventLog>,
}

#[async_trait]
impl Acknowledger for LoggingAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.log.push(format!("ack:{}", delivery_tag));
        Ok(())
    }
}

/// Channel that replays a fixed list of bodies as deliveries tagged 1..=n
pub struct FakeChannel {
    bodies: Mutex<Option<Vec<Vec<u8>>>>,
    hold_open: bool,
    fail_publish: HashSet<String>,
    pub log: Arc<EventLog>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    prefetch: Mutex<Option<u16>>,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn new(bodies: Vec<Vec<u8>>) -> Self {
        FakeChannel {
            bodies: Mutex::new(Some(bodies)),
            hold_open: false,
            fail_publish: HashSet::new(),
            log: Arc::new(EventLog::default()),
            published: Mutex::new(Vec::new()),
            prefetch: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_log(mut self, log: Arc<EventLog>) -> Self {
        self.log = log;
        self
    }

    /// Keep the delivery stream open after the scripted bodies
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Reject publications of tasks with this name
    pub fn failing_publish(mut self, name: &str) -> Self {
        self.fail_publish.insert(name.to_string());
        self
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn published_names(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter_map(|(_, body)| TaskSignature::from_slice(body).ok())
            .map(|sig| sig.name)
            .collect()
    }

    pub fn prefetch(&self) -> Option<u16> {
        *self.prefetch.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        *self.prefetch.lock() = Some(prefetch_count);
        Ok(())
    }

    async fn consume(
        &self,
        _queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let bodies = self.bodies.lock().take().ok_or(BrokerError::Closed)?;
        let acker: Arc<dyn Acknowledger> = Arc::new(LoggingAcker {
            log: self.log.clone(),
        });

        let deliveries: Vec<Delivery> = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| Delivery::new(i as u64 + 1, false, body, acker.clone()))
            .collect();

        let scripted = stream::iter(deliveries);
        if self.hold_open {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn cancel(&self, _consumer_tag: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish_to(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let name = TaskSignature::from_slice(&body)
            .map(|sig| sig.name)
            .unwrap_or_default();
        if self.fail_publish.contains(&name) {
            self.log.push(format!("publish-failed:{}", name));
            return Err(BrokerError::Rejected(format!("cannot publish {}", name)));
        }

        self.log.push(format!("publish:{}", name));
        self.published.lock().push((queue.to_string(), body));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Publisher that records signatures, failing for configured names
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<TaskSignature>>,
    pub fail: HashSet<String>,
}

impl RecordingPublisher {
    pub fn failing(names: &[&str]) -> Self {
        RecordingPublisher {
            published: Mutex::new(Vec::new()),
            fail: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.published.lock().iter().map(|s| s.name.clone()).collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError> {
        if self.fail.contains(&task.name) {
            return Err(BrokerError::Rejected(format!("cannot publish {}", task.name)));
        }
        self.published.lock().push(task.clone());
        Ok(())
    }
}

/// Handler that logs `run:<name>` and returns a fixed outcome
pub struct ScriptedHandler {
    name: String,
    outcome: Result<Value, HandlerError>,
    log: Arc<EventLog>,
}

impl ScriptedHandler {
    pub fn ok(name: &str, value: Value, log: Arc<EventLog>) -> Self {
        ScriptedHandler {
            name: name.to_string(),
            outcome: Ok(value),
            log,
        }
    }

    pub fn err(name: &str, message: &str, log: Arc<EventLog>) -> Self {
        ScriptedHandler {
            name: name.to_string(),
            outcome: Err(HandlerError::new(message)),
            log,
        }
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn run(&self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
        self.log.push(format!("run:{}", self.name));
        self.outcome.clone()
    }
}
