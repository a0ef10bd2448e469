use crate::error::{Result, WorkerError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker: BrokerSettings,
    pub worker: ConsumerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// `host:port` of the broker
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Queue consumed from and published to
    pub queue: String,
    pub consumer_tag: Option<String>,
    pub prefetch_count: u16,
    pub concurrency: usize,
    pub ack_mode: AckMode,
    pub pacing: PacingConfig,
}

/// When a delivery is acknowledged relative to its execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Ack on receipt. A crash during execution loses the task.
    #[default]
    BeforeExecute,
    /// Ack once follow-ups are published. A crash may execute the task twice.
    AfterFinalize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Sleep one unit per `.` byte in the body
    #[default]
    DotCount,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub mode: PacingMode,
    pub unit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            address: "127.0.0.1:5670".to_string(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        ConsumerSettings {
            queue: "tasks".to_string(),
            consumer_tag: None,
            prefetch_count: 3,
            concurrency: 1,
            ack_mode: AckMode::default(),
            pacing: PacingConfig::default(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        PacingConfig {
            mode: PacingMode::default(),
            unit_ms: 1000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl PacingConfig {
    pub fn disabled() -> Self {
        PacingConfig {
            mode: PacingMode::None,
            unit_ms: 0,
        }
    }

    /// Delay to apply before dispatching a delivery with this body
    pub fn delay_for(&self, body: &[u8]) -> Duration {
        match self.mode {
            PacingMode::None => Duration::ZERO,
            PacingMode::DotCount => {
                let dots = body.iter().filter(|&&b| b == b'.').count() as u64;
                Duration::from_millis(dots.saturating_mul(self.unit_ms))
            }
        }
    }
}

impl WorkerConfig {
    /// Load configuration from an optional file and `TQ_*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let config: WorkerConfig = builder
            .add_source(
                Environment::with_prefix("TQ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.queue.trim().is_empty() {
            return Err(WorkerError::InvalidConfig("queue must not be empty".to_string()));
        }
        if self.worker.prefetch_count == 0 {
            return Err(WorkerError::InvalidConfig(
                "prefetch_count must be at least 1".to_string(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(WorkerError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.broker.address.trim().is_empty() {
            return Err(WorkerError::InvalidConfig(
                "broker address must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured consumer tag, or `<hostname>-<pid>-<random>`
    pub fn consumer_tag(&self) -> String {
        if let Some(tag) = self.worker.consumer_tag.as_deref().filter(|t| !t.is_empty()) {
            return tag.to_string();
        }

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "worker".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.broker.address, "127.0.0.1:5670");
        assert_eq!(config.worker.queue, "tasks");
        assert_eq!(config.worker.prefetch_count, 3);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.ack_mode, AckMode::BeforeExecute);
        assert_eq!(config.worker.pacing.mode, PacingMode::DotCount);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let yaml = r#"
broker:
  address: "10.0.0.5:5670"
worker:
  queue: jobs
  prefetch_count: 8
  ack_mode: after_finalize
  pacing:
    mode: none
logging:
  format: json
"#;
        file.write_all(yaml.as_bytes()).unwrap();

        let config = WorkerConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.broker.address, "10.0.0.5:5670");
        assert_eq!(config.worker.queue, "jobs");
        assert_eq!(config.worker.prefetch_count, 8);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.ack_mode, AckMode::AfterFinalize);
        assert_eq!(config.worker.pacing.mode, PacingMode::None);
        assert_eq!(config.worker.pacing.unit_ms, 1000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(WorkerConfig::load(Some("/nonexistent/worker.yaml")).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = WorkerConfig::default();
        config.worker.prefetch_count = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.worker.queue = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dot_count_pacing() {
        let pacing = PacingConfig {
            mode: PacingMode::DotCount,
            unit_ms: 10,
        };
        assert_eq!(pacing.delay_for(b"a.b.c"), Duration::from_millis(20));
        assert_eq!(pacing.delay_for(b"abc"), Duration::ZERO);
        assert_eq!(PacingConfig::disabled().delay_for(b"..."), Duration::ZERO);
    }

    #[test]
    fn test_consumer_tag() {
        let mut config = WorkerConfig::default();
        config.worker.consumer_tag = Some("worker-a".to_string());
        assert_eq!(config.consumer_tag(), "worker-a");

        config.worker.consumer_tag = None;
        let generated = config.consumer_tag();
        assert!(generated.contains(&format!("-{}-", std::process::id())));
        assert_ne!(generated, config.consumer_tag());
    }
}
