use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::execution::{BatchStatus, JobInstance, StepExecution};
use crate::partition::PartitionPlan;
use crate::store::ExecutionStore;
use crate::Result;

/// The partitions a manager step must run on this attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSet {
    /// Partitions to execute, with their input context
    pub to_run: PartitionPlan,
    /// Planned partitions whose latest attempt already completed
    pub skipped: BTreeSet<String>,
    /// Partitions to execute that have an earlier, unsuccessful attempt
    pub restarted: BTreeSet<String>,
}

impl RunSet {
    /// Names of the partitions to execute
    pub fn names(&self) -> BTreeSet<String> {
        self.to_run.keys().cloned().collect()
    }

    /// Whether nothing needs to run
    pub fn is_empty(&self) -> bool {
        self.to_run.is_empty()
    }

    /// Number of partitions to execute
    pub fn len(&self) -> usize {
        self.to_run.len()
    }
}

/// Latest step execution per partition name, from a creation-ordered history
pub fn latest_by_partition(history: Vec<StepExecution>) -> BTreeMap<String, StepExecution> {
    let mut latest: BTreeMap<String, StepExecution> = BTreeMap::new();
    for execution in history {
        let Some(name) = execution.partition_name.clone() else {
            continue;
        };
        match latest.get(&name) {
            Some(current) if current.id > execution.id => {}
            _ => {
                latest.insert(name, execution);
            }
        }
    }
    latest
}

/// Decides which planned partitions need (re)execution
#[derive(Clone)]
pub struct StepExecutionSplitter {
    store: Arc<dyn ExecutionStore>,
}

impl StepExecutionSplitter {
    /// Create a splitter reading history from `store`
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Reconcile `plan` with the partition history recorded under the
    /// manager execution's step name.
    ///
    /// A planned partition is skipped iff its latest recorded attempt is
    /// COMPLETED. Partitions with no history, or whose latest attempt is
    /// FAILED, STOPPED or was left STARTING/EXECUTING by a crash, run.
    #[instrument(
        skip(self, instance, manager_execution, plan),
        fields(job_instance = %instance.id, step = %manager_execution.step_name, planned = plan.len())
    )]
    pub async fn split(
        &self,
        instance: &JobInstance,
        manager_execution: &StepExecution,
        plan: PartitionPlan,
    ) -> Result<RunSet> {
        let history = self
            .store
            .list_step_executions(instance, &manager_execution.step_name)
            .await?;
        let latest = latest_by_partition(history);

        let mut run_set = RunSet::default();
        for (name, context) in plan {
            match latest.get(&name).map(|e| e.status) {
                Some(BatchStatus::Completed) => {
                    debug!(partition = %name, "Partition already completed, skipping");
                    run_set.skipped.insert(name);
                }
                Some(previous) => {
                    debug!(partition = %name, previous = %previous, "Partition will be restarted");
                    run_set.restarted.insert(name.clone());
                    run_set.to_run.insert(name, context);
                }
                None => {
                    run_set.to_run.insert(name, context);
                }
            }
        }

        info!(
            to_run = run_set.to_run.len(),
            skipped = run_set.skipped.len(),
            restarted = run_set.restarted.len(),
            "Partitions split"
        );

        Ok(run_set)
    }
}
