use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub network: NetworkConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Port for the prometheus `/metrics` endpoint, disabled when unset
    pub metrics_port: Option<u16>,
    pub log_level: String,
    /// `text` or `json`
    pub log_format: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 5670,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from an optional file and `TQ_BROKER_*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("TQ_BROKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }
}
