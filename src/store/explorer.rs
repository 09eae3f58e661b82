use std::collections::BTreeMap;
use std::sync::Arc;

use crate::execution::{BatchStatus, JobInstance, JobParameters, StepExecution};
use crate::store::{ExecutionStore, StoreResult};

/// All attempts recorded for one partition, oldest first
#[derive(Debug, Clone)]
pub struct PartitionHistory {
    /// Partition name
    pub partition: String,
    /// Recorded attempts in creation order
    pub attempts: Vec<StepExecution>,
}

impl PartitionHistory {
    /// The attempt that decides whether the partition runs again
    pub fn latest(&self) -> Option<&StepExecution> {
        self.attempts.last()
    }

    /// Status of the latest attempt
    pub fn latest_status(&self) -> Option<BatchStatus> {
        self.latest().map(|e| e.status)
    }
}

/// Read-only queries over an execution store
#[derive(Clone)]
pub struct JobExplorer {
    store: Arc<dyn ExecutionStore>,
}

impl JobExplorer {
    /// Explorer over `store`
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Instance for a job name and parameters, if it was ever launched
    pub async fn job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> StoreResult<Option<JobInstance>> {
        self.store.find_job_instance(job_name, parameters).await
    }

    /// Latest execution of a step (manager or `"{worker}:{partition}"`)
    pub async fn latest_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> StoreResult<Option<StepExecution>> {
        self.store.find_latest_step_execution(instance, step_name).await
    }

    /// Attempts grouped by partition name, in partition-name order
    pub async fn partition_history(
        &self,
        instance: &JobInstance,
        manager_step_name: &str,
    ) -> StoreResult<Vec<PartitionHistory>> {
        let executions = self
            .store
            .list_step_executions(instance, manager_step_name)
            .await?;

        let mut grouped: BTreeMap<String, Vec<StepExecution>> = BTreeMap::new();
        for execution in executions {
            if let Some(partition) = execution.partition_name.clone() {
                grouped.entry(partition).or_default().push(execution);
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(partition, attempts)| PartitionHistory { partition, attempts })
            .collect())
    }
}
