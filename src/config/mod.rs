use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

use crate::core::admission::AdmissionConfig;
use crate::core::error::FlowError;
use crate::core::queue::{Capacity, OverflowPolicy, Queue};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Buffer size; omitted means unbounded.
    pub capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow_policy: OverflowPolicy::Wait,
        }
    }
}

impl QueueConfig {
    pub fn capacity(&self) -> Capacity {
        Capacity::from_option(self.capacity)
    }

    pub fn build<T>(&self) -> Result<Queue<T>, FlowError> {
        Queue::new(self.capacity(), self.overflow_policy)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }
}

/// One worker per core, with a minimum of 2 and maximum of 32.
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .clamp(2, 32)
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub admission: AdmissionConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] FlowError),
}

impl Config {
    /// Parses and validates a TOML document. Missing sections and fields
    /// take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.queue.capacity == Some(0) {
            return Err(FlowError::InvalidConfig(
                "queue.capacity must be at least 1 (omit it for unbounded)".to_string(),
            ));
        }
        if self.workers.worker_count == 0 {
            return Err(FlowError::InvalidConfig(
                "workers.worker_count must be at least 1".to_string(),
            ));
        }
        self.admission.validate()
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: Config = Config::from_toml_str(&raw)?;
    Ok(config)
}
