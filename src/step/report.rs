use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::batch::PartitionOutcome;
use crate::execution::{BatchStatus, StepExecution};
use crate::{BatchError, Result};

/// A planned partition that was not COMPLETED when the manager step finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFailure {
    /// Partition name
    pub partition: String,
    /// Status of the latest attempt; `None` if it never ran
    pub status: Option<BatchStatus>,
    /// Recorded failure reason
    pub reason: String,
}

impl From<&PartitionFailure> for BatchError {
    fn from(failure: &PartitionFailure) -> Self {
        BatchError::PartitionFailed {
            partition: failure.partition.clone(),
            reason: failure.reason.clone(),
        }
    }
}

/// Render failures as `"partition2 (boom), partition4 (not executed)"`
pub fn summarize_failures(failures: &[PartitionFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.partition, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of one manager step execution
#[derive(Debug, Clone)]
pub struct StepReport {
    /// The manager's own record, in its terminal state
    pub step_execution: StepExecution,
    /// Aggregate status: COMPLETED or FAILED
    pub status: BatchStatus,
    /// Partitions that started on this run, with their outcome
    pub executed: BTreeMap<String, PartitionOutcome>,
    /// Partitions that were due to run but were cancelled before starting
    pub not_started: BTreeSet<String>,
    /// Partitions skipped because an earlier run completed them
    pub skipped: BTreeSet<String>,
    /// Partitions due to run that had an earlier unsuccessful attempt
    pub restarted: BTreeSet<String>,
    /// Every planned partition not COMPLETED after this run
    pub failures: Vec<PartitionFailure>,
}

impl StepReport {
    /// Whether every planned partition is COMPLETED
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// Names of the partitions that started on this run
    pub fn executed_names(&self) -> BTreeSet<String> {
        self.executed.keys().cloned().collect()
    }

    /// One [`BatchError::PartitionFailed`] per partition that did not complete
    pub fn partition_errors(&self) -> Vec<BatchError> {
        self.failures.iter().map(BatchError::from).collect()
    }

    /// Turn a FAILED report into [`BatchError::ManagerAggregateFailure`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BatchError::ManagerAggregateFailure {
                step: self.step_execution.step_name.clone(),
                failures: self.failures,
            })
        }
    }
}
