use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BatchStatus, ExecutionContext, JobParameters};

/// Identifier of a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobInstanceId(pub i64);

/// Identifier of a step execution; higher ids were created later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepExecutionId(pub i64);

impl fmt::Display for JobInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StepExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical unit of recurring work, identified by job name and the
/// identifying launch parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Store-assigned identifier
    pub id: JobInstanceId,
    /// Name of the job
    pub job_name: String,
    /// Hash of the identifying parameters
    pub job_key: String,
    /// The identifying parameters the instance was created with
    pub parameters: JobParameters,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// One durable attempt to run a manager step or a single partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Store-assigned identifier
    pub id: StepExecutionId,
    /// Owning job instance
    pub job_instance_id: JobInstanceId,
    /// Step name; partitions use `"{worker_step}:{partition}"`
    pub step_name: String,
    /// Manager step name for partition records
    pub parent_step_name: Option<String>,
    /// Partition name for partition records
    pub partition_name: Option<String>,
    /// Launch attempt this record belongs to
    pub run_id: Uuid,
    /// Current status
    pub status: BatchStatus,
    /// Attached context
    pub execution_context: ExecutionContext,
    /// When the record was created
    pub start_time: DateTime<Utc>,
    /// When the record reached a terminal status
    pub end_time: Option<DateTime<Utc>>,
    /// Last write to the record
    pub last_updated: DateTime<Utc>,
}

impl StepExecution {
    /// Failure reason recorded in the context, if any
    pub fn failure_reason(&self) -> Option<&str> {
        self.execution_context.get_str(super::ERROR_KEY)
    }
}

/// What a caller supplies to record the start of a step execution
#[derive(Debug, Clone)]
pub struct NewStepExecution {
    /// Step name
    pub step_name: String,
    /// Manager step name for partition records
    pub parent_step_name: Option<String>,
    /// Partition name for partition records
    pub partition_name: Option<String>,
    /// Launch attempt
    pub run_id: Uuid,
    /// Initial context, persisted with the STARTING record
    pub execution_context: ExecutionContext,
}

impl NewStepExecution {
    /// Record for a manager step
    pub fn manager(step_name: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            step_name: step_name.into(),
            parent_step_name: None,
            partition_name: None,
            run_id,
            execution_context: ExecutionContext::new(),
        }
    }

    /// Record for one partition of a manager step
    pub fn partition(
        worker_step_name: &str,
        manager_step_name: impl Into<String>,
        partition_name: impl Into<String>,
        run_id: Uuid,
        execution_context: ExecutionContext,
    ) -> Self {
        let partition_name = partition_name.into();
        Self {
            step_name: partition_step_name(worker_step_name, &partition_name),
            parent_step_name: Some(manager_step_name.into()),
            partition_name: Some(partition_name),
            run_id,
            execution_context,
        }
    }
}

/// Step name of a partition record
pub fn partition_step_name(worker_step_name: &str, partition_name: &str) -> String {
    format!("{worker_step_name}:{partition_name}")
}
