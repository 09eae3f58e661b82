//! Partition planning and restart-aware splitting
//!
//! A [`Partitioner`] turns a grid size into named partitions. The
//! [`PartitionPlanner`] validates that plan and the
//! [`StepExecutionSplitter`] reconciles it with the store's history to
//! decide which partitions actually run.

use std::collections::BTreeMap;

use crate::execution::ExecutionContext;

/// Plan validation
pub mod planner;
/// Restart-aware splitting
pub mod splitter;

pub use planner::PartitionPlanner;
pub use splitter::{RunSet, StepExecutionSplitter};

/// Partition name → partition input, ordered by name
pub type PartitionPlan = BTreeMap<String, ExecutionContext>;

/// Produces the partitions of a step.
///
/// Names must be deterministic for a given grid size: restart matching
/// relies on the same name meaning the same slice of work on every run.
pub trait Partitioner: Send + Sync {
    /// Build the plan for `grid_size` partitions
    fn partition(&self, grid_size: usize) -> PartitionPlan;
}

impl<F> Partitioner for F
where
    F: Fn(usize) -> PartitionPlan + Send + Sync,
{
    fn partition(&self, grid_size: usize) -> PartitionPlan {
        self(grid_size)
    }
}

/// Partitioner producing `partition0..partition{n-1}`, each carrying
/// `data = "data{i}"`
#[derive(Debug, Clone)]
pub struct IndexedPartitioner {
    name_prefix: String,
    data_key: String,
    data_prefix: String,
}

impl Default for IndexedPartitioner {
    fn default() -> Self {
        Self {
            name_prefix: "partition".to_string(),
            data_key: "data".to_string(),
            data_prefix: "data".to_string(),
        }
    }
}

impl IndexedPartitioner {
    /// Create a partitioner with the default naming
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix of partition names
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Context key and value prefix of the per-partition data
    pub fn with_data(mut self, key: impl Into<String>, value_prefix: impl Into<String>) -> Self {
        self.data_key = key.into();
        self.data_prefix = value_prefix.into();
        self
    }
}

impl Partitioner for IndexedPartitioner {
    fn partition(&self, grid_size: usize) -> PartitionPlan {
        (0..grid_size)
            .map(|i| {
                let mut context = ExecutionContext::new();
                context.put(self.data_key.clone(), format!("{}{}", self.data_prefix, i));
                (format!("{}{}", self.name_prefix, i), context)
            })
            .collect()
    }
}
