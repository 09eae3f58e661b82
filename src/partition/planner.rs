use std::sync::Arc;

use tracing::{debug, instrument};

use crate::partition::{PartitionPlan, Partitioner};
use crate::{BatchError, Result};

/// Builds validated partition plans from a [`Partitioner`]
#[derive(Clone)]
pub struct PartitionPlanner {
    partitioner: Arc<dyn Partitioner>,
}

impl PartitionPlanner {
    /// Wrap a partitioner
    pub fn new(partitioner: Arc<dyn Partitioner>) -> Self {
        Self { partitioner }
    }

    /// Plan `grid_size` partitions.
    ///
    /// Fails with [`BatchError::InvalidGridSize`] for a zero grid and with a
    /// configuration error if the partitioner returns nothing or an unnamed
    /// partition.
    #[instrument(skip(self))]
    pub fn plan(&self, grid_size: usize) -> Result<PartitionPlan> {
        if grid_size == 0 {
            return Err(BatchError::InvalidGridSize(grid_size));
        }

        let plan = self.partitioner.partition(grid_size);

        if plan.is_empty() {
            return Err(BatchError::Configuration(format!(
                "partitioner returned no partitions for grid size {grid_size}"
            )));
        }
        if plan.keys().any(|name| name.trim().is_empty()) {
            return Err(BatchError::Configuration(
                "partitioner returned a partition without a name".to_string(),
            ));
        }

        debug!(grid_size, partitions = plan.len(), "Partition plan built");
        Ok(plan)
    }
}
