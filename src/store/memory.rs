use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::execution::{
    BatchStatus, ExecutionContext, JobInstance, JobInstanceId, JobParameters, NewStepExecution,
    StepExecution, StepExecutionId,
};
use crate::store::{check_transition, ExecutionStore, InstanceCreation, StoreError, StoreResult};

/// In-memory execution store.
///
/// Clones share the same state, so one store can back several launches in
/// a process. Nothing survives the process.
#[derive(Clone, Default)]
pub struct MemoryExecutionStore {
    instances: Arc<DashMap<(String, String), JobInstance>>,
    executions: Arc<DashMap<StepExecutionId, StepExecution>>,
    instance_index: Arc<DashMap<JobInstanceId, Vec<StepExecutionId>>>,
    instance_seq: Arc<AtomicI64>,
    execution_seq: Arc<AtomicI64>,
}

impl MemoryExecutionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of step executions recorded for an instance
    pub fn step_execution_count(&self, instance: &JobInstance) -> usize {
        self.instance_index
            .get(&instance.id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// All step executions of an instance, oldest first
    pub fn step_executions(&self, instance: &JobInstance) -> Vec<StepExecution> {
        self.collect(instance, |_| true)
    }

    fn collect<F>(&self, instance: &JobInstance, filter: F) -> Vec<StepExecution>
    where
        F: Fn(&StepExecution) -> bool,
    {
        let ids = self
            .instance_index
            .get(&instance.id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut found: Vec<StepExecution> = ids
            .iter()
            .filter_map(|id| self.executions.get(id).map(|e| e.value().clone()))
            .filter(|e| filter(e))
            .collect();
        found.sort_by_key(|e| e.id);
        found
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        mode: InstanceCreation,
    ) -> StoreResult<JobInstance> {
        let job_key = parameters.job_key();

        match self.instances.entry((job_name.to_string(), job_key.clone())) {
            Entry::Occupied(existing) => match mode {
                InstanceCreation::GetOrCreate => Ok(existing.get().clone()),
                InstanceCreation::CreateOnly => Err(StoreError::DuplicateInstance {
                    job_name: job_name.to_string(),
                    job_key,
                }),
            },
            Entry::Vacant(slot) => {
                let instance = JobInstance {
                    id: JobInstanceId(self.instance_seq.fetch_add(1, Ordering::SeqCst) + 1),
                    job_name: job_name.to_string(),
                    job_key,
                    parameters: parameters.identifying(),
                    created_at: Utc::now(),
                };
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    async fn find_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> StoreResult<Option<JobInstance>> {
        Ok(self
            .instances
            .get(&(job_name.to_string(), parameters.job_key()))
            .map(|entry| entry.value().clone()))
    }

    async fn record_step_execution_start(
        &self,
        instance: &JobInstance,
        new: NewStepExecution,
    ) -> StoreResult<StepExecution> {
        let now = Utc::now();
        let execution = StepExecution {
            id: StepExecutionId(self.execution_seq.fetch_add(1, Ordering::SeqCst) + 1),
            job_instance_id: instance.id,
            step_name: new.step_name,
            parent_step_name: new.parent_step_name,
            partition_name: new.partition_name,
            run_id: new.run_id,
            status: BatchStatus::Starting,
            execution_context: new.execution_context,
            start_time: now,
            end_time: None,
            last_updated: now,
        };

        self.executions.insert(execution.id, execution.clone());
        self.instance_index
            .entry(instance.id)
            .or_default()
            .push(execution.id);

        Ok(execution)
    }

    async fn update_step_execution_status(
        &self,
        id: StepExecutionId,
        status: BatchStatus,
        context: &ExecutionContext,
    ) -> StoreResult<StepExecution> {
        // The shard lock held by `get_mut` makes check-and-write atomic per record
        let mut entry = self
            .executions
            .get_mut(&id)
            .ok_or(StoreError::StepExecutionNotFound(id))?;

        check_transition(id, entry.status, status)?;

        let now = Utc::now();
        entry.status = status;
        entry.execution_context = context.clone();
        entry.last_updated = now;
        if status.is_terminal() {
            entry.end_time = Some(now);
        }

        Ok(entry.value().clone())
    }

    async fn find_latest_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> StoreResult<Option<StepExecution>> {
        Ok(self
            .collect(instance, |e| e.step_name == step_name)
            .into_iter()
            .last())
    }

    async fn list_step_executions(
        &self,
        instance: &JobInstance,
        parent_step_name: &str,
    ) -> StoreResult<Vec<StepExecution>> {
        Ok(self.collect(instance, |e| {
            e.parent_step_name.as_deref() == Some(parent_step_name)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn params(name: &str, fail: &str) -> JobParameters {
        JobParameters::builder()
            .add_string("name", name)
            .add_string_with("fail", fail, false)
            .build()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryExecutionStore::new();
        let first = store
            .create_job_instance("job", &params("foo", "true"), InstanceCreation::GetOrCreate)
            .await
            .unwrap();
        let second = store
            .create_job_instance("job", &params("foo", "false"), InstanceCreation::GetOrCreate)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.parameters.get("fail").is_none());

        let other = store
            .create_job_instance("job", &params("bar", "true"), InstanceCreation::GetOrCreate)
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_create_only_rejects_duplicates() {
        let store = MemoryExecutionStore::new();
        store
            .create_job_instance("job", &params("foo", "true"), InstanceCreation::CreateOnly)
            .await
            .unwrap();
        let err = store
            .create_job_instance("job", &params("foo", "false"), InstanceCreation::CreateOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateInstance { .. }));
    }

    #[tokio::test]
    async fn test_status_is_monotonic() {
        let store = MemoryExecutionStore::new();
        let instance = store
            .create_job_instance("job", &params("foo", "false"), InstanceCreation::GetOrCreate)
            .await
            .unwrap();
        let exec = store
            .record_step_execution_start(
                &instance,
                NewStepExecution::manager("managerStep", Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert_eq!(exec.status, BatchStatus::Starting);
        assert!(exec.end_time.is_none());

        let ctx = ExecutionContext::new();
        store
            .update_step_execution_status(exec.id, BatchStatus::Executing, &ctx)
            .await
            .unwrap();
        let done = store
            .update_step_execution_status(exec.id, BatchStatus::Completed, &ctx)
            .await
            .unwrap();
        assert!(done.end_time.is_some());

        let err = store
            .update_step_execution_status(exec.id, BatchStatus::Failed, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: BatchStatus::Completed,
                to: BatchStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_latest_and_listing_follow_creation_order() {
        let store = MemoryExecutionStore::new();
        let instance = store
            .create_job_instance("job", &params("foo", "false"), InstanceCreation::GetOrCreate)
            .await
            .unwrap();
        let run = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let e = store
                .record_step_execution_start(
                    &instance,
                    NewStepExecution::partition(
                        "workerStep",
                        "managerStep",
                        "partition0",
                        run,
                        ExecutionContext::new(),
                    ),
                )
                .await
                .unwrap();
            ids.push(e.id);
        }
        store
            .record_step_execution_start(&instance, NewStepExecution::manager("managerStep", run))
            .await
            .unwrap();

        let latest = store
            .find_latest_step_execution(&instance, "workerStep:partition0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, ids[1]);

        let listed = store.list_step_executions(&instance, "managerStep").await.unwrap();
        assert_eq!(listed.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
        assert_eq!(store.step_execution_count(&instance), 3);
    }

    #[tokio::test]
    async fn test_unknown_step_execution() {
        let store = MemoryExecutionStore::new();
        let err = store
            .update_step_execution_status(
                StepExecutionId(42),
                BatchStatus::Completed,
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StepExecutionNotFound(StepExecutionId(42))));
    }
}
