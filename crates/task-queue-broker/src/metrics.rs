use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters
    pub messages_published: IntCounterVec,
    pub messages_delivered: IntCounterVec,
    pub messages_acked: IntCounterVec,
    pub messages_requeued: IntCounterVec,

    // Queue depth
    pub queue_ready: IntGaugeVec,
    pub queue_unacked: IntGaugeVec,
    pub queue_consumers: IntGaugeVec,

    pub connections: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_published = IntCounterVec::new(
            Opts::new("tq_broker_messages_published_total", "Messages published by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(messages_published.clone()))?;

        let messages_delivered = IntCounterVec::new(
            Opts::new(
                "tq_broker_messages_delivered_total",
                "Messages delivered to consumers by queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(messages_delivered.clone()))?;

        let messages_acked = IntCounterVec::new(
            Opts::new("tq_broker_messages_acked_total", "Deliveries acknowledged by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(messages_acked.clone()))?;

        let messages_requeued = IntCounterVec::new(
            Opts::new(
                "tq_broker_messages_requeued_total",
                "Unacknowledged deliveries returned to the queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(messages_requeued.clone()))?;

        let queue_ready = IntGaugeVec::new(
            Opts::new("tq_broker_queue_ready", "Messages waiting for a consumer"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_ready.clone()))?;

        let queue_unacked = IntGaugeVec::new(
            Opts::new("tq_broker_queue_unacked", "Deliveries awaiting acknowledgment"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_unacked.clone()))?;

        let queue_consumers = IntGaugeVec::new(
            Opts::new("tq_broker_queue_consumers", "Active consumers"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_consumers.clone()))?;

        let connections = IntGauge::new("tq_broker_connections", "Open client connections")?;
        registry.register(Box::new(connections.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_published,
            messages_delivered,
            messages_acked,
            messages_requeued,
            queue_ready,
            queue_unacked,
            queue_consumers,
            connections,
        })
    }

    /// Update depth gauges for a queue
    pub fn set_queue_depth(&self, queue: &str, ready: usize, unacked: usize, consumers: usize) {
        self.queue_ready.with_label_values(&[queue]).set(ready as i64);
        self.queue_unacked.with_label_values(&[queue]).set(unacked as i64);
        self.queue_consumers.with_label_values(&[queue]).set(consumers as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        let metrics = BrokerMetrics::new().unwrap();
        metrics.messages_published.with_label_values(&["tasks"]).inc();
        metrics.set_queue_depth("tasks", 4, 2, 1);

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"tq_broker_messages_published_total".to_string()));
        assert!(names.contains(&"tq_broker_queue_unacked".to_string()));
        assert_eq!(metrics.queue_ready.with_label_values(&["tasks"]).get(), 4);
    }
}
