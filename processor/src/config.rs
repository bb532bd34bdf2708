use config::{Config, ConfigError, Environment, File, FileFormat};
use results_store::{RetryPolicy, StoreConfig};
use scan_ingest::NatsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "processor.yaml";
const ENV_PREFIX: &str = "PROCESSOR";

/// Effective settings, layered as built-in defaults, then the YAML file, then
/// `PROCESSOR_*` environment variables (`__` separates nested keys, e.g.
/// `PROCESSOR_STORE__TYPE=sqlite`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub store: StoreConfig,
    pub queue: NatsConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub graceful_shutdown_timeout_ms: u64,
    /// 0 disables the per-write deadline.
    pub persist_timeout_ms: u64,
    pub receive_error_backoff_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            graceful_shutdown_timeout_ms: 5000,
            persist_timeout_ms: 10_000,
            receive_error_backoff_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }

    pub fn persist_timeout(&self) -> Option<Duration> {
        (self.persist_timeout_ms > 0).then(|| Duration::from_millis(self.persist_timeout_ms))
    }

    pub fn receive_error_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_error_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: "info".to_string(), format: LogFormat::Text }
    }
}

impl ProcessorConfig {
    /// Load from `path`, or from `./processor.yaml` when present.
    ///
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml));
            }
            None => {}
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
