//! The manager step
//!
//! [`ManagerStep`] ties planning, splitting and the worker pool together
//! and decides the step's own terminal status from the partition history.

mod manager;
mod report;

pub use manager::ManagerStep;
pub use report::{summarize_failures, PartitionFailure, StepReport};
