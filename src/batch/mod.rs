//! Worker pool coordination
//!
//! The [`WorkerPoolCoordinator`] runs a set of partitions concurrently on a
//! bounded pool of tokio tasks, records every attempt in the execution
//! store and waits for all of them before returning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::execution::{BatchStatus, ExecutionContext, JobParameters, StepExecutionId};

/// Bounded worker pool
pub mod coordinator;

pub use coordinator::WorkerPoolCoordinator;

/// The work performed for a single partition.
///
/// `context` is the partition's input as produced by the partitioner; any
/// values the implementation adds are persisted with the partition's
/// terminal status. Returning an error (or panicking) marks the partition
/// FAILED; a later launch of the same job instance runs it again.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Process one partition
    async fn execute(
        &self,
        context: &mut ExecutionContext,
        params: &JobParameters,
    ) -> anyhow::Result<()>;
}

/// Cooperative cancellation shared between a caller and a coordinator.
///
/// A request stays set until the coordinator pass it applies to has
/// finished; the pass then clears it so the next launch runs normally.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Create a signal that is not cancelled
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Clear a pending request
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// What happened to one partition during a coordinator pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    /// Partition name
    pub partition: String,
    /// Record written for this attempt; `None` if the partition never started
    pub step_execution_id: Option<StepExecutionId>,
    /// Terminal status of the attempt
    pub status: BatchStatus,
    /// Failure reason
    pub error: Option<String>,
    /// Wall time spent on the partition
    pub duration: Duration,
}

impl PartitionOutcome {
    /// Whether the partition completed
    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// Whether a step execution was recorded for this attempt
    pub fn was_started(&self) -> bool {
        self.step_execution_id.is_some()
    }

    pub(crate) fn not_started(partition: String) -> Self {
        Self {
            partition,
            step_execution_id: None,
            status: BatchStatus::Stopped,
            error: Some("cancelled before start".to_string()),
            duration: Duration::ZERO,
        }
    }
}
