//! Execution domain model
//!
//! Job instances, step executions, their contexts and statuses, and the
//! launch parameters that decide job-instance identity.

mod context;
mod parameters;
mod status;
mod step;

pub use context::{
    ExecutionContext, ERROR_KEY, FAILED_KEY, GRID_SIZE_KEY, PARTITIONS_KEY, SKIPPED_KEY,
};
pub use parameters::{JobParameter, JobParameters, JobParametersBuilder, ParameterValue};
pub use status::BatchStatus;
pub use step::{
    partition_step_name, JobInstance, JobInstanceId, NewStepExecution, StepExecution,
    StepExecutionId,
};
