// Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use partitioned_batch::batch::UnitOfWork;
use partitioned_batch::execution::{
    BatchStatus, ExecutionContext, JobInstance, JobParameters, NewStepExecution, StepExecution,
    StepExecutionId,
};
use partitioned_batch::store::{
    ExecutionStore, InstanceCreation, MemoryExecutionStore, StoreError, StoreResult,
};

/// Parameters of the classic restart scenario
pub fn scenario_params(fail: bool) -> JobParameters {
    JobParameters::builder()
        .add_string("name", "foo")
        .add_string_with("fail", fail.to_string(), false)
        .build()
}

#[derive(Default)]
struct WorkState {
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Unit of work that records every call by its `data` value and can be
/// told to fail, panic or sleep for chosen inputs
#[derive(Clone, Default)]
pub struct RecordingWork {
    state: Arc<WorkState>,
    fail_on: BTreeSet<String>,
    panic_on: BTreeSet<String>,
    fail_when_flagged: Option<String>,
    delay: Option<Duration>,
}

impl RecordingWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I: IntoIterator<Item = &'static str>>(mut self, data: I) -> Self {
        self.fail_on.extend(data.into_iter().map(String::from));
        self
    }

    pub fn panicking<I: IntoIterator<Item = &'static str>>(mut self, data: I) -> Self {
        self.panic_on.extend(data.into_iter().map(String::from));
        self
    }

    /// Fail `data` only when the `fail` parameter is true
    pub fn failing_when_flagged(mut self, data: &str) -> Self {
        self.fail_when_flagged = Some(data.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `data` values seen so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn sorted_calls(&self) -> Vec<String> {
        let mut calls = self.calls();
        calls.sort();
        calls
    }

    /// Highest number of simultaneous calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWork for RecordingWork {
    async fn execute(
        &self,
        context: &mut ExecutionContext,
        params: &JobParameters,
    ) -> anyhow::Result<()> {
        let data = context.get_str("data").unwrap_or_default().to_string();
        self.state.calls.lock().unwrap().push(data.clone());

        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.state.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.contains(&data) {
            panic!("worker blew up on {data}");
        }
        if self.fail_on.contains(&data) {
            anyhow::bail!("cannot process {data}");
        }
        if params.get_flag("fail") && self.fail_when_flagged.as_deref() == Some(data.as_str()) {
            anyhow::bail!("failure requested for {data}");
        }

        context.put("result", format!("{data}-done"));
        Ok(())
    }
}

/// Memory store that logs every status it persists and can simulate an outage
#[derive(Clone, Default)]
pub struct InstrumentedStore {
    pub inner: MemoryExecutionStore,
    events: Arc<Mutex<Vec<(StepExecutionId, BatchStatus)>>>,
    down: Arc<AtomicBool>,
    crash_on_partition_start: Arc<AtomicBool>,
    // partition starts allowed before the store goes down
    start_budget: Arc<Mutex<Option<usize>>>,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation while `down` is set
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Let `n` more partition starts through, then fail further starts
    pub fn fail_partition_starts_after(&self, n: usize) {
        *self.start_budget.lock().unwrap() = Some(n);
    }

    /// Panic inside the store whenever a partition start is recorded
    pub fn crash_on_partition_start(&self, crash: bool) {
        self.crash_on_partition_start.store(crash, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        self.set_down(false);
        self.crash_on_partition_start(false);
        *self.start_budget.lock().unwrap() = None;
    }

    /// Statuses persisted for one step execution, in order
    pub fn statuses_of(&self, id: StepExecutionId) -> Vec<BatchStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event_id, _)| *event_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn check_up(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExecutionStore for InstrumentedStore {
    async fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        mode: InstanceCreation,
    ) -> StoreResult<JobInstance> {
        self.check_up()?;
        self.inner.create_job_instance(job_name, parameters, mode).await
    }

    async fn find_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> StoreResult<Option<JobInstance>> {
        self.check_up()?;
        self.inner.find_job_instance(job_name, parameters).await
    }

    async fn record_step_execution_start(
        &self,
        instance: &JobInstance,
        new: NewStepExecution,
    ) -> StoreResult<StepExecution> {
        self.check_up()?;
        if new.partition_name.is_some() {
            if self.crash_on_partition_start.load(Ordering::SeqCst) {
                panic!("store driver crashed");
            }
            let mut budget = self.start_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => {
                    return Err(StoreError::Unavailable("connection reset".to_string()));
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        let execution = self.inner.record_step_execution_start(instance, new).await?;
        self.events
            .lock()
            .unwrap()
            .push((execution.id, execution.status));
        Ok(execution)
    }

    async fn update_step_execution_status(
        &self,
        id: StepExecutionId,
        status: BatchStatus,
        context: &ExecutionContext,
    ) -> StoreResult<StepExecution> {
        self.check_up()?;
        let execution = self
            .inner
            .update_step_execution_status(id, status, context)
            .await?;
        self.events.lock().unwrap().push((id, status));
        Ok(execution)
    }

    async fn find_latest_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> StoreResult<Option<StepExecution>> {
        self.check_up()?;
        self.inner.find_latest_step_execution(instance, step_name).await
    }

    async fn list_step_executions(
        &self,
        instance: &JobInstance,
        parent_step_name: &str,
    ) -> StoreResult<Vec<StepExecution>> {
        self.check_up()?;
        self.inner.list_step_executions(instance, parent_step_name).await
    }
}
