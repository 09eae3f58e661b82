//! Engine configuration
//!
//! [`BatchConfig`] holds everything a partitioned job needs besides its
//! collaborators. Values come from `Default`, the `with_*` builders, a JSON
//! document, or `BATCH_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BatchError, Result};

/// Environment variable overriding [`BatchConfig::grid_size`]
pub const ENV_GRID_SIZE: &str = "BATCH_GRID_SIZE";
/// Environment variable overriding [`BatchConfig::max_concurrency`]
pub const ENV_MAX_CONCURRENCY: &str = "BATCH_MAX_CONCURRENCY";
/// Environment variable setting [`BatchConfig::partition_timeout`] in milliseconds
pub const ENV_PARTITION_TIMEOUT_MS: &str = "BATCH_PARTITION_TIMEOUT_MS";

/// What happens to running partitions when the coordinator is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Let in-flight partitions finish and record their real outcome
    #[default]
    Drain,
    /// Interrupt in-flight partitions and record them STOPPED
    StopInFlight,
}

/// Partitioned job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Name of the manager step
    pub manager_step_name: String,
    /// Name of the worker step; partition records are `"{worker}:{partition}"`
    pub worker_step_name: String,
    /// Number of partitions requested from the partitioner
    pub grid_size: usize,
    /// Maximum partitions running at once
    pub max_concurrency: usize,
    /// Optional per-partition time limit
    #[serde(with = "optional_millis")]
    pub partition_timeout: Option<Duration>,
    /// Handling of running partitions on cancellation
    pub abort_policy: AbortPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            manager_step_name: "managerStep".to_string(),
            worker_step_name: "workerStep".to_string(),
            grid_size: 4,
            max_concurrency: num_cpus::get(),
            partition_timeout: None,
            abort_policy: AbortPolicy::Drain,
        }
    }
}

impl BatchConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the manager step name
    pub fn with_manager_step_name(mut self, name: impl Into<String>) -> Self {
        self.manager_step_name = name.into();
        self
    }

    /// Set the worker step name
    pub fn with_worker_step_name(mut self, name: impl Into<String>) -> Self {
        self.worker_step_name = name.into();
        self
    }

    /// Set the grid size
    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Set the concurrency limit (at least one)
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Set a per-partition timeout
    pub fn with_partition_timeout(mut self, timeout: Duration) -> Self {
        self.partition_timeout = Some(timeout);
        self
    }

    /// Set the cancellation policy
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    /// Parse from a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `BATCH_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_GRID_SIZE) {
            self.grid_size = parse_env(ENV_GRID_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = parse_env(ENV_MAX_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_PARTITION_TIMEOUT_MS) {
            let millis: u64 = parse_env(ENV_PARTITION_TIMEOUT_MS, &value)?;
            self.partition_timeout = Some(Duration::from_millis(millis));
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(BatchError::InvalidGridSize(self.grid_size));
        }
        if self.max_concurrency == 0 {
            return Err(BatchError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.manager_step_name.is_empty() || self.worker_step_name.is_empty() {
            return Err(BatchError::Configuration(
                "step names must not be empty".to_string(),
            ));
        }
        if self.manager_step_name == self.worker_step_name {
            return Err(BatchError::Configuration(format!(
                "manager and worker step share the name {}",
                self.manager_step_name
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BatchError::Configuration(format!("{key} has invalid value {value:?}")))
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
