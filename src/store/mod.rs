//! Durable execution state
//!
//! The [`ExecutionStore`] trait records job instances and step executions.
//! Restart decisions are made entirely from what a store returns, so every
//! backend must persist a record before the work it describes begins and
//! must apply status writes atomically per record.

mod explorer;
mod memory;
pub mod postgres;

pub use explorer::{JobExplorer, PartitionHistory};
pub use memory::MemoryExecutionStore;
pub use postgres::{PostgresConfig, PostgresExecutionStore};

use async_trait::async_trait;
use thiserror::Error;

use crate::execution::{
    BatchStatus, ExecutionContext, JobInstance, JobParameters, NewStepExecution, StepExecution,
    StepExecutionId,
};

/// Errors raised by execution stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity or persistence fault; fatal for the current run
    #[error("Execution store unavailable: {0}")]
    Unavailable(String),

    /// Create-only instance creation found an existing instance
    #[error("Job instance already exists: {job_name} ({job_key})")]
    DuplicateInstance {
        /// Job name
        job_name: String,
        /// Identifying parameter hash
        job_key: String,
    },

    /// No step execution with this id
    #[error("Step execution not found: {0}")]
    StepExecutionNotFound(StepExecutionId),

    /// Status write that would move a record backwards or out of a terminal status
    #[error("Invalid status transition for step execution {id}: {from} -> {to}")]
    InvalidTransition {
        /// Step execution id
        id: StepExecutionId,
        /// Current status
        from: BatchStatus,
        /// Requested status
        to: BatchStatus,
    },

    /// Context could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How [`ExecutionStore::create_job_instance`] treats an existing instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceCreation {
    /// Return the existing instance if there is one
    GetOrCreate,
    /// Fail with [`StoreError::DuplicateInstance`] if one exists
    CreateOnly,
}

/// Persistence contract for job instances and step executions
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Look up or create the instance for `(job_name, identifying params)`
    async fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        mode: InstanceCreation,
    ) -> StoreResult<JobInstance>;

    /// Find the instance for `(job_name, identifying params)` without creating it
    async fn find_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> StoreResult<Option<JobInstance>>;

    /// Durably record a new step execution in STARTING
    async fn record_step_execution_start(
        &self,
        instance: &JobInstance,
        new: NewStepExecution,
    ) -> StoreResult<StepExecution>;

    /// Atomically set status and context of one step execution
    async fn update_step_execution_status(
        &self,
        id: StepExecutionId,
        status: BatchStatus,
        context: &ExecutionContext,
    ) -> StoreResult<StepExecution>;

    /// Most recently created step execution with this step name
    async fn find_latest_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> StoreResult<Option<StepExecution>>;

    /// Every partition step execution ever created under a manager step,
    /// oldest first
    async fn list_step_executions(
        &self,
        instance: &JobInstance,
        parent_step_name: &str,
    ) -> StoreResult<Vec<StepExecution>>;
}

pub(crate) fn check_transition(
    id: StepExecutionId,
    from: BatchStatus,
    to: BatchStatus,
) -> StoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { id, from, to })
    }
}
