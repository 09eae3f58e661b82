use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::batch::{CancellationSignal, PartitionOutcome, UnitOfWork};
use crate::config::{AbortPolicy, BatchConfig};
use crate::execution::{
    BatchStatus, ExecutionContext, JobInstance, JobParameters, NewStepExecution, StepExecution,
    ERROR_KEY,
};
use crate::metrics::{StepMetrics, Timer};
use crate::partition::RunSet;
use crate::store::{ExecutionStore, StoreError};
use crate::{BatchError, Result};

/// Runs the partitions of a manager step on a bounded pool of tokio tasks
pub struct WorkerPoolCoordinator {
    store: Arc<dyn ExecutionStore>,
    work: Arc<dyn UnitOfWork>,
    worker_step_name: String,
    max_concurrency: usize,
    partition_timeout: Option<Duration>,
    abort_policy: AbortPolicy,
    cancellation: CancellationSignal,
}

impl WorkerPoolCoordinator {
    /// Create a coordinator using the worker name, concurrency limit,
    /// timeout and abort policy of `config`
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        work: Arc<dyn UnitOfWork>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            store,
            work,
            worker_step_name: config.worker_step_name.clone(),
            max_concurrency: config.max_concurrency.max(1),
            partition_timeout: config.partition_timeout,
            abort_policy: config.abort_policy,
            cancellation: CancellationSignal::new(),
        }
    }

    /// Use an externally owned cancellation signal
    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = signal;
        self
    }

    /// Handle for cancelling runs of this coordinator
    pub fn cancellation_signal(&self) -> CancellationSignal {
        self.cancellation.clone()
    }

    /// Concurrency limit
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Execute every partition of `run_set` and wait for all of them.
    ///
    /// Each partition is recorded STARTING before its work begins, then
    /// EXECUTING, then COMPLETED, FAILED or STOPPED. Partition failures are
    /// returned as outcomes. A store error, or a partition task that dies
    /// outside its unit of work, aborts the remaining queue and is returned
    /// once the in-flight partitions have finished.
    ///
    /// A cancellation request seen by the pass is cleared when it returns.
    #[instrument(
        skip_all,
        fields(
            job_instance = %instance.id,
            step = %manager_execution.step_name,
            partitions = run_set.len(),
            max_concurrency = self.max_concurrency
        )
    )]
    pub async fn execute(
        &self,
        instance: &JobInstance,
        manager_execution: &StepExecution,
        run_set: &RunSet,
        params: &JobParameters,
    ) -> Result<BTreeMap<String, PartitionOutcome>> {
        let result = self
            .run_pass(instance, manager_execution, run_set, params)
            .await;
        if self.cancellation.is_cancelled() {
            debug!("Cancellation request consumed by this pass");
            self.cancellation.reset();
        }
        result
    }

    async fn run_pass(
        &self,
        instance: &JobInstance,
        manager_execution: &StepExecution,
        run_set: &RunSet,
        params: &JobParameters,
    ) -> Result<BTreeMap<String, PartitionOutcome>> {
        if run_set.is_empty() {
            info!("No partitions to execute");
            return Ok(BTreeMap::new());
        }

        let pass = Timer::start();
        info!(
            restarted = run_set.restarted.len(),
            timeout = ?self.partition_timeout,
            abort_policy = ?self.abort_policy,
            "Starting partition pass"
        );

        let dispatch = Arc::new(Dispatch {
            store: self.store.clone(),
            work: self.work.clone(),
            instance: instance.clone(),
            manager_step_name: manager_execution.step_name.clone(),
            worker_step_name: self.worker_step_name.clone(),
            run_id: manager_execution.run_id,
            params: params.clone(),
            timeout: self.partition_timeout,
            abort_policy: self.abort_policy,
            cancellation: self.cancellation.clone(),
            abort: CancellationSignal::new(),
            metrics: StepMetrics::new(manager_execution.step_name.clone()),
        });
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut tasks = Vec::with_capacity(run_set.len());
        for (partition, context) in &run_set.to_run {
            let task = dispatch
                .clone()
                .run_partition(partition.clone(), context.clone(), semaphore.clone())
                .in_current_span();
            tasks.push((partition.clone(), tokio::spawn(task)));
        }

        let mut outcomes = BTreeMap::new();
        let mut fatal: Option<BatchError> = None;
        for (partition, task) in tasks {
            match task.await {
                Ok(Ok(outcome)) => {
                    outcomes.insert(partition, outcome);
                }
                Ok(Err(err)) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    error!(partition = %partition, error = %join_err, "Partition task died, cancelling queued partitions");
                    dispatch.abort.cancel();
                    if fatal.is_none() {
                        fatal = Some(join_err.into());
                    }
                }
            }
        }

        if let Some(err) = fatal {
            error!(error = %err, "Partition pass aborted");
            return Err(err);
        }

        let count = |status: BatchStatus| outcomes.values().filter(|o| o.status == status).count();
        info!(
            completed = count(BatchStatus::Completed),
            failed = count(BatchStatus::Failed),
            stopped = count(BatchStatus::Stopped),
            duration_ms = pass.elapsed().as_millis() as u64,
            "Partition pass finished"
        );

        Ok(outcomes)
    }
}

/// Everything a partition task needs, shared by all tasks of one pass
struct Dispatch {
    store: Arc<dyn ExecutionStore>,
    work: Arc<dyn UnitOfWork>,
    instance: JobInstance,
    manager_step_name: String,
    worker_step_name: String,
    run_id: Uuid,
    params: JobParameters,
    timeout: Option<Duration>,
    abort_policy: AbortPolicy,
    cancellation: CancellationSignal,
    // set when the store fails; stops the queue but not in-flight work
    abort: CancellationSignal,
    metrics: StepMetrics,
}

enum Attempt {
    Finished(std::thread::Result<anyhow::Result<()>>),
    TimedOut(Duration),
    Interrupted,
}

impl Dispatch {
    fn queue_closed(&self) -> bool {
        self.cancellation.is_cancelled() || self.abort.is_cancelled()
    }

    async fn wait_queue_closed(&self) {
        tokio::select! {
            _ = self.cancellation.cancelled() => {}
            _ = self.abort.cancelled() => {}
        }
    }

    fn abort_on(&self, partition: &str, err: StoreError) -> BatchError {
        error!(partition = %partition, error = %err, "Execution store failed, cancelling queued partitions");
        self.abort.cancel();
        err.into()
    }

    async fn run_partition(
        self: Arc<Self>,
        partition: String,
        context: ExecutionContext,
        semaphore: Arc<Semaphore>,
    ) -> Result<PartitionOutcome> {
        let permit = tokio::select! {
            permit = semaphore.acquire_owned() => permit.ok(),
            _ = self.wait_queue_closed() => None,
        };
        let _permit = match permit {
            Some(permit) if !self.queue_closed() => permit,
            _ => {
                debug!(partition = %partition, "Run cancelled before partition started");
                return Ok(PartitionOutcome::not_started(partition));
            }
        };

        let timer = Timer::start();
        let new = NewStepExecution::partition(
            &self.worker_step_name,
            self.manager_step_name.clone(),
            partition.clone(),
            self.run_id,
            context.clone(),
        );
        let execution = self
            .store
            .record_step_execution_start(&self.instance, new)
            .await
            .map_err(|e| self.abort_on(&partition, e))?;

        self.store
            .update_step_execution_status(execution.id, BatchStatus::Executing, &context)
            .await
            .map_err(|e| self.abort_on(&partition, e))?;

        debug!(
            partition = %partition,
            step_execution = %execution.id,
            "Partition executing"
        );
        self.metrics.partition_started();

        let mut context = context;
        let (status, reason) = self.invoke(&mut context).await;
        if let Some(reason) = &reason {
            context.put(ERROR_KEY, reason.clone());
        }

        let duration = timer.elapsed();
        self.metrics.partition_finished(status, duration.as_secs_f64());

        match status {
            BatchStatus::Completed => info!(
                partition = %partition,
                duration_ms = duration.as_millis() as u64,
                "Partition completed"
            ),
            _ => warn!(
                partition = %partition,
                status = %status,
                reason = reason.as_deref().unwrap_or_default(),
                duration_ms = duration.as_millis() as u64,
                "Partition did not complete"
            ),
        }

        self.store
            .update_step_execution_status(execution.id, status, &context)
            .await
            .map_err(|e| self.abort_on(&partition, e))?;

        Ok(PartitionOutcome {
            partition,
            step_execution_id: Some(execution.id),
            status,
            error: reason,
            duration,
        })
    }

    async fn invoke(&self, context: &mut ExecutionContext) -> (BatchStatus, Option<String>) {
        let work = AssertUnwindSafe(self.work.execute(context, &self.params)).catch_unwind();
        let timeout = self.timeout;
        let limited = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => Attempt::Finished(result),
                    Err(_) => Attempt::TimedOut(limit),
                },
                None => Attempt::Finished(work.await),
            }
        };

        let attempt = match self.abort_policy {
            AbortPolicy::Drain => limited.await,
            AbortPolicy::StopInFlight => tokio::select! {
                attempt = limited => attempt,
                _ = self.cancellation.cancelled() => Attempt::Interrupted,
            },
        };

        match attempt {
            Attempt::Finished(Ok(Ok(()))) => (BatchStatus::Completed, None),
            Attempt::Finished(Ok(Err(err))) => (BatchStatus::Failed, Some(format!("{err:#}"))),
            Attempt::Finished(Err(panic)) => (
                BatchStatus::Failed,
                Some(format!("panicked: {}", panic_message(panic.as_ref()))),
            ),
            Attempt::TimedOut(limit) => (
                BatchStatus::Failed,
                Some(format!("timed out after {}ms", limit.as_millis())),
            ),
            Attempt::Interrupted => (BatchStatus::Stopped, Some("stopped by cancellation".to_string())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::StepExecution;
    use crate::partition::{IndexedPartitioner, Partitioner};
    use crate::store::{InstanceCreation, MemoryExecutionStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FailOn(&'static str);

    #[async_trait]
    impl UnitOfWork for FailOn {
        async fn execute(
            &self,
            context: &mut ExecutionContext,
            _params: &JobParameters,
        ) -> anyhow::Result<()> {
            if context.get_str("data") == Some(self.0) {
                anyhow::bail!("bad input {}", self.0);
            }
            context.put("processed", true);
            Ok(())
        }
    }

    async fn setup(store: &MemoryExecutionStore) -> (JobInstance, StepExecution) {
        let params = JobParameters::builder().add_string("name", "foo").build();
        let instance = store
            .create_job_instance("job", &params, InstanceCreation::GetOrCreate)
            .await
            .unwrap();
        let manager = store
            .record_step_execution_start(
                &instance,
                NewStepExecution::manager("managerStep", Uuid::new_v4()),
            )
            .await
            .unwrap();
        (instance, manager)
    }

    fn run_set(grid: usize) -> RunSet {
        RunSet {
            to_run: IndexedPartitioner::new().partition(grid),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partitions_are_recorded_and_fail_independently() {
        let store = MemoryExecutionStore::new();
        let (instance, manager) = setup(&store).await;
        let coordinator = WorkerPoolCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(FailOn("data1")),
            &BatchConfig::default().with_max_concurrency(2),
        );

        let outcomes = coordinator
            .execute(&instance, &manager, &run_set(3), &JobParameters::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["partition0"].status, BatchStatus::Completed);
        assert_eq!(outcomes["partition1"].status, BatchStatus::Failed);
        assert_eq!(outcomes["partition2"].status, BatchStatus::Completed);
        assert_eq!(
            outcomes["partition1"].error.as_deref(),
            Some("bad input data1")
        );

        let history = store
            .list_step_executions(&instance, "managerStep")
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        for execution in &history {
            assert_eq!(execution.run_id, manager.run_id);
            assert!(execution.status.is_terminal());
            assert!(execution.end_time.is_some());
        }
        let failed = history
            .iter()
            .find(|e| e.partition_name.as_deref() == Some("partition1"))
            .unwrap();
        assert_eq!(failed.step_name, "workerStep:partition1");
        assert_eq!(failed.failure_reason(), Some("bad input data1"));

        let completed = history
            .iter()
            .find(|e| e.partition_name.as_deref() == Some("partition0"))
            .unwrap();
        assert_eq!(
            completed.execution_context.get("processed"),
            Some(&serde_json::json!(true))
        );
    }

    #[tokio::test]
    async fn test_empty_run_set_does_nothing() {
        let store = MemoryExecutionStore::new();
        let (instance, manager) = setup(&store).await;
        let coordinator = WorkerPoolCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(FailOn("none")),
            &BatchConfig::default(),
        );

        let outcomes = coordinator
            .execute(&instance, &manager, &RunSet::default(), &JobParameters::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(store.step_execution_count(&instance), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_records_nothing() {
        let store = MemoryExecutionStore::new();
        let (instance, manager) = setup(&store).await;
        let coordinator = WorkerPoolCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(FailOn("none")),
            &BatchConfig::default(),
        );
        coordinator.cancellation_signal().cancel();

        let outcomes = coordinator
            .execute(&instance, &manager, &run_set(3), &JobParameters::new())
            .await
            .unwrap();

        assert!(outcomes.values().all(|o| o.status == BatchStatus::Stopped));
        assert!(outcomes.values().all(|o| !o.was_started()));
        assert_eq!(store.step_execution_count(&instance), 1);
        assert!(!coordinator.cancellation_signal().is_cancelled());

        // The next pass is not affected by the earlier request
        let outcomes = coordinator
            .execute(&instance, &manager, &run_set(3), &JobParameters::new())
            .await
            .unwrap();
        assert!(outcomes.values().all(|o| o.is_completed()));
        assert_eq!(store.step_execution_count(&instance), 4);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
