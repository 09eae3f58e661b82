//! Job construction and launching
//!
//! [`PartitionedJob`] wires a partitioner and a unit of work into a manager
//! step. [`JobLauncher`] resolves the job instance for a set of parameters
//! and runs the step, so launching again with the same identifying
//! parameters restarts the same instance.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::batch::{CancellationSignal, UnitOfWork, WorkerPoolCoordinator};
use crate::config::BatchConfig;
use crate::execution::{BatchStatus, JobInstance, JobParameters};
use crate::partition::{PartitionPlanner, Partitioner, StepExecutionSplitter};
use crate::step::{ManagerStep, StepReport};
use crate::store::{ExecutionStore, InstanceCreation};
use crate::{BatchError, Result};

/// A named job consisting of one partitioned manager step
pub struct PartitionedJob {
    name: String,
    config: BatchConfig,
    step: ManagerStep,
}

impl PartitionedJob {
    /// Start building a job
    pub fn builder(name: impl Into<String>) -> PartitionedJobBuilder {
        PartitionedJobBuilder {
            name: name.into(),
            config: BatchConfig::default(),
            store: None,
            partitioner: None,
            work: None,
            cancellation: None,
        }
    }

    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the job was built with
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The manager step
    pub fn step(&self) -> &ManagerStep {
        &self.step
    }

    /// Signal that cancels the current launch of this job; later launches
    /// run normally
    pub fn cancellation_signal(&self) -> CancellationSignal {
        self.step.coordinator().cancellation_signal()
    }
}

/// Builder for [`PartitionedJob`]
pub struct PartitionedJobBuilder {
    name: String,
    config: BatchConfig,
    store: Option<Arc<dyn ExecutionStore>>,
    partitioner: Option<Arc<dyn Partitioner>>,
    work: Option<Arc<dyn UnitOfWork>>,
    cancellation: Option<CancellationSignal>,
}

impl PartitionedJobBuilder {
    /// Engine configuration
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Execution store holding the job's history
    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Partitioner producing the plan
    pub fn partitioner<P: Partitioner + 'static>(mut self, partitioner: P) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    /// Work run for every partition
    pub fn unit_of_work<W: UnitOfWork + 'static>(mut self, work: W) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

    /// Share a cancellation signal with the caller
    pub fn cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }

    /// Validate the configuration and assemble the job
    pub fn build(self) -> Result<PartitionedJob> {
        if self.name.trim().is_empty() {
            return Err(BatchError::Configuration("job name must not be empty".to_string()));
        }
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| BatchError::Configuration("no execution store configured".to_string()))?;
        let partitioner = self
            .partitioner
            .ok_or_else(|| BatchError::Configuration("no partitioner configured".to_string()))?;
        let work = self
            .work
            .ok_or_else(|| BatchError::Configuration("no unit of work configured".to_string()))?;

        let mut coordinator = WorkerPoolCoordinator::new(store.clone(), work, &self.config);
        if let Some(signal) = self.cancellation {
            coordinator = coordinator.with_cancellation(signal);
        }
        let step = ManagerStep::new(
            &self.config,
            store.clone(),
            PartitionPlanner::new(partitioner),
            StepExecutionSplitter::new(store),
            coordinator,
        );

        Ok(PartitionedJob {
            name: self.name,
            config: self.config,
            step,
        })
    }
}

/// Outcome of one launch
#[derive(Debug, Clone)]
pub struct JobReport {
    /// The job instance that was run
    pub instance: JobInstance,
    /// Report of the manager step
    pub step: StepReport,
}

impl JobReport {
    /// Aggregate status of the launch
    pub fn status(&self) -> BatchStatus {
        self.step.status
    }

    /// `Err(ManagerAggregateFailure)` unless every partition completed
    pub fn into_result(self) -> Result<Self> {
        let JobReport { instance, step } = self;
        let step = step.into_result()?;
        Ok(JobReport { instance, step })
    }
}

/// Launches partitioned jobs against an execution store
#[derive(Clone)]
pub struct JobLauncher {
    store: Arc<dyn ExecutionStore>,
    creation: InstanceCreation,
}

impl JobLauncher {
    /// Launcher that restarts existing instances
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            creation: InstanceCreation::GetOrCreate,
        }
    }

    /// Refuse to launch an instance that already exists
    pub fn create_only(mut self) -> Self {
        self.creation = InstanceCreation::CreateOnly;
        self
    }

    /// Run `job` for the instance identified by `params`.
    ///
    /// A FAILED step is reported through [`JobReport::status`]; use
    /// [`JobReport::into_result`] to turn it into an error.
    #[instrument(skip_all, fields(job = %job.name()))]
    pub async fn run(&self, job: &PartitionedJob, params: &JobParameters) -> Result<JobReport> {
        let instance = self
            .store
            .create_job_instance(job.name(), params, self.creation)
            .await?;
        info!(
            job_instance = %instance.id,
            job_key = %instance.job_key,
            parameters = params.len(),
            "Launching job"
        );

        let step = job.step().execute(&instance, params).await?;

        if !step.skipped.is_empty() {
            info!(skipped = ?step.skipped, "Partitions completed on an earlier run were skipped");
        }
        info!(
            job_instance = %instance.id,
            status = %step.status,
            executed = ?step.executed_names(),
            not_started = ?step.not_started,
            restarted = ?step.restarted,
            "Job finished"
        );

        Ok(JobReport { instance, step })
    }
}
