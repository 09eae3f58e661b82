use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::WorkerPoolCoordinator;
use crate::config::BatchConfig;
use crate::execution::{
    BatchStatus, ExecutionContext, JobInstance, JobParameters, NewStepExecution, StepExecution,
    ERROR_KEY, FAILED_KEY, GRID_SIZE_KEY, PARTITIONS_KEY, SKIPPED_KEY,
};
use crate::metrics::{StepMetrics, Timer};
use crate::partition::splitter::latest_by_partition;
use crate::partition::{PartitionPlanner, StepExecutionSplitter};
use crate::step::{PartitionFailure, StepReport};
use crate::store::ExecutionStore;
use crate::{BatchError, Result};

/// Orchestrates one partitioned step: plan, split, fan out, aggregate
pub struct ManagerStep {
    name: String,
    grid_size: usize,
    store: Arc<dyn ExecutionStore>,
    planner: PartitionPlanner,
    splitter: StepExecutionSplitter,
    coordinator: WorkerPoolCoordinator,
    metrics: StepMetrics,
}

impl ManagerStep {
    /// Assemble a manager step named `config.manager_step_name`
    pub fn new(
        config: &BatchConfig,
        store: Arc<dyn ExecutionStore>,
        planner: PartitionPlanner,
        splitter: StepExecutionSplitter,
        coordinator: WorkerPoolCoordinator,
    ) -> Self {
        Self {
            name: config.manager_step_name.clone(),
            grid_size: config.grid_size,
            store,
            planner,
            splitter,
            coordinator,
            metrics: StepMetrics::new(config.manager_step_name.clone()),
        }
    }

    /// Step name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker pool used for the partitions
    pub fn coordinator(&self) -> &WorkerPoolCoordinator {
        &self.coordinator
    }

    /// Run the step for `instance`.
    ///
    /// Records the manager's own execution, runs the partitions that have
    /// not completed on earlier runs and finishes COMPLETED only if every
    /// planned partition's latest record is COMPLETED. A FAILED aggregate is
    /// returned as a report; `Err` means the run could not be carried out.
    #[instrument(skip_all, fields(step = %self.name, job_instance = %instance.id, grid_size = self.grid_size))]
    pub async fn execute(
        &self,
        instance: &JobInstance,
        params: &JobParameters,
    ) -> Result<StepReport> {
        let timer = Timer::start();
        let run_id = Uuid::new_v4();
        let execution = self
            .store
            .record_step_execution_start(instance, NewStepExecution::manager(&self.name, run_id))
            .await?;
        info!(step_execution = %execution.id, run_id = %run_id, "Manager step starting");

        let mut context = ExecutionContext::new();
        context.put(GRID_SIZE_KEY, self.grid_size as u64);

        let plan = match self.planner.plan(self.grid_size) {
            Ok(plan) => plan,
            Err(err) => return Err(self.abandon(&execution, &mut context, err).await),
        };
        let planned: Vec<String> = plan.keys().cloned().collect();
        context.put_serialized(PARTITIONS_KEY, &planned)?;

        let run_set = match self.splitter.split(instance, &execution, plan).await {
            Ok(run_set) => run_set,
            Err(err) => return Err(self.abandon(&execution, &mut context, err).await),
        };
        context.put_serialized(SKIPPED_KEY, &run_set.skipped)?;
        self.metrics.partitions_skipped(run_set.skipped.len());

        if let Err(err) = self
            .store
            .update_step_execution_status(execution.id, BatchStatus::Executing, &context)
            .await
        {
            return Err(self.abandon(&execution, &mut context, err.into()).await);
        }

        let outcomes = match self
            .coordinator
            .execute(instance, &execution, &run_set, params)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(err) => return Err(self.abandon(&execution, &mut context, err).await),
        };
        let (executed, queued): (BTreeMap<_, _>, BTreeMap<_, _>) =
            outcomes.into_iter().partition(|(_, o)| o.was_started());
        let not_started: BTreeSet<String> = queued.into_keys().collect();

        // Aggregate from what the store holds, not from this pass alone
        let history = match self.store.list_step_executions(instance, &self.name).await {
            Ok(history) => history,
            Err(err) => return Err(self.abandon(&execution, &mut context, err.into()).await),
        };
        let failures = aggregate(&planned, latest_by_partition(history));
        let status = if failures.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };

        let failed: Vec<&str> = failures.iter().map(|f| f.partition.as_str()).collect();
        context.put_serialized(FAILED_KEY, &failed)?;
        let step_execution = self
            .store
            .update_step_execution_status(execution.id, status, &context)
            .await?;
        self.metrics.manager_finished(status);

        if status == BatchStatus::Completed {
            info!(
                executed = executed.len(),
                skipped = run_set.skipped.len(),
                duration_ms = timer.elapsed().as_millis() as u64,
                "Manager step completed"
            );
        } else {
            for failure in &failures {
                warn!(error = %BatchError::from(failure), "Partition not completed");
            }
            warn!(
                executed = executed.len(),
                not_started = not_started.len(),
                skipped = run_set.skipped.len(),
                failed = ?failed,
                duration_ms = timer.elapsed().as_millis() as u64,
                "Manager step failed"
            );
        }

        Ok(StepReport {
            step_execution,
            status,
            executed,
            not_started,
            skipped: run_set.skipped,
            restarted: run_set.restarted,
            failures,
        })
    }

    /// Best effort: mark the manager FAILED and hand back the original error
    async fn abandon(
        &self,
        execution: &StepExecution,
        context: &mut ExecutionContext,
        err: BatchError,
    ) -> BatchError {
        error!(error = %err, "Manager step aborted");
        context.put(ERROR_KEY, err.to_string());
        if let Err(write_err) = self
            .store
            .update_step_execution_status(execution.id, BatchStatus::Failed, context)
            .await
        {
            warn!(error = %write_err, "Could not record manager failure");
        }
        self.metrics.manager_finished(BatchStatus::Failed);
        err
    }
}

fn aggregate(
    planned: &[String],
    latest: BTreeMap<String, StepExecution>,
) -> Vec<PartitionFailure> {
    planned
        .iter()
        .filter_map(|partition| match latest.get(partition) {
            Some(execution) if execution.status == BatchStatus::Completed => None,
            Some(execution) => Some(PartitionFailure {
                partition: partition.clone(),
                status: Some(execution.status),
                reason: execution
                    .failure_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("left {}", execution.status)),
            }),
            None => Some(PartitionFailure {
                partition: partition.clone(),
                status: None,
                reason: "not executed".to_string(),
            }),
        })
        .collect()
}
