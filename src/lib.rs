//! # Partitioned Batch
//!
//! A partitioned batch-step engine with restartable partitions.
//!
//! ## Overview
//!
//! A manager step splits its work into named partitions, runs them on a
//! bounded pool of concurrent workers and records every attempt in an
//! [`ExecutionStore`](store::ExecutionStore). Launching the same job
//! instance again re-executes only the partitions whose latest attempt did
//! not complete; completed partitions are left untouched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use partitioned_batch::batch::UnitOfWork;
//! use partitioned_batch::execution::{ExecutionContext, JobParameters};
//! use partitioned_batch::launcher::{JobLauncher, PartitionedJob};
//! use partitioned_batch::partition::IndexedPartitioner;
//! use partitioned_batch::store::MemoryExecutionStore;
//!
//! struct Print;
//!
//! #[async_trait::async_trait]
//! impl UnitOfWork for Print {
//!     async fn execute(
//!         &self,
//!         context: &mut ExecutionContext,
//!         _params: &JobParameters,
//!     ) -> anyhow::Result<()> {
//!         println!("processing {:?}", context.get_str("data"));
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> partitioned_batch::Result<()> {
//! let store = Arc::new(MemoryExecutionStore::new());
//! let job = PartitionedJob::builder("job")
//!     .store(store.clone())
//!     .partitioner(IndexedPartitioner::default())
//!     .unit_of_work(Print)
//!     .build()?;
//!
//! let params = JobParameters::builder().add_string("name", "foo").build();
//! let report = JobLauncher::new(store).run(&job, &params).await?;
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`execution`]: job instances, step executions, contexts, parameters
//! - [`store`]: execution store trait and backends
//! - [`partition`]: partition planning and restart-aware splitting
//! - [`batch`]: bounded worker pool coordinator
//! - [`step`]: the manager step and its report
//! - [`launcher`]: job construction and launching
//! - [`config`]: engine configuration
//! - [`metrics`]: Prometheus metrics

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batch operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// Grid size must be positive
    #[error("Invalid grid size: {0}")]
    InvalidGridSize(usize),

    /// A create-only launch found an existing job instance
    #[error("Job instance already exists: {job_name} ({job_key})")]
    DuplicateInstance {
        /// Job name
        job_name: String,
        /// Identifying parameter hash
        job_key: String,
    },

    /// The execution store cannot be reached; the run is aborted
    #[error("Execution store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single partition failed
    #[error("Partition {partition} failed: {reason}")]
    PartitionFailed {
        /// Partition name
        partition: String,
        /// Failure reason
        reason: String,
    },

    /// The manager step finished with partitions that did not complete
    #[error("Step {step} failed: {}", step::summarize_failures(.failures))]
    ManagerAggregateFailure {
        /// Manager step name
        step: String,
        /// Every partition that did not complete
        failures: Vec<step::PartitionFailure>,
    },

    /// Store rejected an operation (e.g. an invalid status transition)
    #[error("Store error: {0}")]
    Store(store::StoreError),

    /// Invalid configuration or collaborator output
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<store::StoreError> for BatchError {
    fn from(err: store::StoreError) -> Self {
        match err {
            store::StoreError::Unavailable(msg) => BatchError::StoreUnavailable(msg),
            store::StoreError::DuplicateInstance { job_name, job_key } => {
                BatchError::DuplicateInstance { job_name, job_key }
            }
            other => BatchError::Store(other),
        }
    }
}

impl BatchError {
    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, BatchError::StoreUnavailable(_))
    }
}

/// Execution domain model
pub mod execution;

/// Execution store and backends
pub mod store;

/// Partition planning and splitting
pub mod partition;

/// Worker pool coordination
pub mod batch;

/// Manager step
pub mod step;

/// Job construction and launching
pub mod launcher;

/// Engine configuration
pub mod config;

/// Prometheus metrics
pub mod metrics;
