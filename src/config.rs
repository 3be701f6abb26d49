use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuator::ActuatorConfig;
use crate::api::ApiConfig;
use crate::classify::{ClassifierConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::processor::ProcessorConfig;
use crate::queue::QueueConfig;

const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POLL_MS: u64 = 1000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 500;
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SorterConfigFile {
    upload_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    actuator: Option<ActuatorConfigFile>,
    worker: Option<WorkerConfigFile>,
    queue: Option<QueueConfigFile>,
    classifier: Option<ClassifierConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ActuatorConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    timeout_ms: Option<u64>,
    reconnect_on_send: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WorkerConfigFile {
    count: Option<usize>,
    poll_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QueueConfigFile {
    capacity: Option<usize>,
    enqueue_timeout_ms: Option<u64>,
    dedup: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    timeout_ms: Option<u64>,
}

/// Runtime configuration for `sorterd`.
#[derive(Debug, Clone)]
pub struct SorterConfig {
    pub upload_dir: PathBuf,
    pub api: ApiConfig,
    pub actuator: ActuatorConfig,
    pub processor: ProcessorConfig,
    pub stop_timeout: Duration,
    pub queue: QueueConfig,
    pub classifier: ClassifierConfig,
}

impl SorterConfig {
    /// File named by `SORTER_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SORTER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SorterConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SorterConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let actuator = file.actuator.unwrap_or_default();
        let worker = file.worker.unwrap_or_default();
        let queue = file.queue.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();

        Self {
            upload_dir: file
                .upload_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            api: ApiConfig {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                max_upload_bytes: api
                    .max_upload_bytes
                    .unwrap_or(ApiConfig::default().max_upload_bytes),
            },
            actuator: ActuatorConfig {
                port: actuator
                    .port
                    .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
                baud_rate: actuator.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                timeout: Duration::from_millis(
                    actuator.timeout_ms.unwrap_or(DEFAULT_SERIAL_TIMEOUT_MS),
                ),
            },
            processor: ProcessorConfig {
                workers: worker.count.unwrap_or(DEFAULT_WORKERS),
                poll_interval: Duration::from_millis(worker.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
                reconnect_on_send: actuator.reconnect_on_send.unwrap_or(false),
            },
            stop_timeout: Duration::from_millis(
                worker.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
            queue: QueueConfig {
                capacity: queue.capacity.unwrap_or(0),
                enqueue_timeout: Duration::from_millis(
                    queue
                        .enqueue_timeout_ms
                        .unwrap_or(DEFAULT_ENQUEUE_TIMEOUT_MS),
                ),
                dedup: queue.dedup.unwrap_or(false),
            },
            classifier: ClassifierConfig {
                endpoint: classifier
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                model: classifier
                    .model
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key: None,
                timeout: Duration::from_millis(
                    classifier
                        .timeout_ms
                        .unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_string("SORTER_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(addr) = env_string("SORTER_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(port) = env_string("SORTER_SERIAL_PORT") {
            self.actuator.port = port;
        }
        if let Some(baud) = env_parsed::<u32>("SORTER_BAUD_RATE", "an integer baud rate")? {
            self.actuator.baud_rate = baud;
        }
        if let Some(ms) = env_parsed::<u64>("SORTER_SERIAL_TIMEOUT_MS", "milliseconds")? {
            self.actuator.timeout = Duration::from_millis(ms);
        }
        if let Some(reconnect) = env_parsed::<bool>("SORTER_RECONNECT_ON_SEND", "true or false")? {
            self.processor.reconnect_on_send = reconnect;
        }
        if let Some(ms) = env_parsed::<u64>("SORTER_POLL_MS", "milliseconds")? {
            self.processor.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parsed::<u64>("SORTER_STOP_TIMEOUT_MS", "milliseconds")? {
            self.stop_timeout = Duration::from_millis(ms);
        }
        if let Some(count) = env_parsed::<usize>("SORTER_WORKERS", "a worker count")? {
            self.processor.workers = count;
        }
        if let Some(capacity) = env_parsed::<usize>("SORTER_QUEUE_CAPACITY", "an item count")? {
            self.queue.capacity = capacity;
        }
        if let Some(dedup) = env_parsed::<bool>("SORTER_DEDUP", "true or false")? {
            self.queue.dedup = dedup;
        }
        if let Some(endpoint) = env_string("SORTER_CLASSIFIER_ENDPOINT") {
            self.classifier.endpoint = endpoint;
        }
        if let Some(model) = env_string("SORTER_MODEL") {
            self.classifier.model = model;
        }
        self.classifier.api_key = env_string("GEMINI_API_KEY");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.actuator.baud_rate == 0 {
            return Err(anyhow!("actuator baud rate must be greater than zero"));
        }
        if self.actuator.port.trim().is_empty() {
            return Err(anyhow!("actuator port must not be empty"));
        }
        if self.processor.workers == 0 {
            return Err(anyhow!("worker count must be greater than zero"));
        }
        if self.processor.poll_interval.is_zero() {
            return Err(anyhow!("worker poll interval must be greater than zero"));
        }
        if self.actuator.timeout.is_zero() {
            return Err(anyhow!("actuator timeout must be greater than zero"));
        }
        if self.classifier.timeout.is_zero() {
            return Err(anyhow!("classifier timeout must be greater than zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        if self.processor.workers > 1 {
            log::warn!(
                "{} workers configured: items are processed concurrently and global order is not preserved",
                self.processor.workers
            );
        }
        self.api
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api.addr, e))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SorterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        None => Ok(None),
    }
}
