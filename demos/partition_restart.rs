//! Restarting a partitioned job
//!
//! Runs a three-partition job twice with the same identifying parameters.
//! The first launch asks `partition2` to fail; the second launch re-executes
//! only that partition and completes the job.

use std::sync::Arc;

use async_trait::async_trait;
use partitioned_batch::{
    batch::UnitOfWork,
    config::BatchConfig,
    execution::{ExecutionContext, JobParameters},
    launcher::{JobLauncher, PartitionedJob},
    partition::IndexedPartitioner,
    store::{JobExplorer, MemoryExecutionStore},
    Result,
};
use tracing_subscriber::EnvFilter;

/// Prints its partition's data and fails on `data2` when `fail=true`
struct Tasklet;

#[async_trait]
impl UnitOfWork for Tasklet {
    async fn execute(
        &self,
        context: &mut ExecutionContext,
        params: &JobParameters,
    ) -> anyhow::Result<()> {
        let data = context.get_str("data").unwrap_or_default().to_string();
        println!("   processing {data}");
        if params.get_flag("fail") && data == "data2" {
            anyhow::bail!("expected failure on {data}");
        }
        Ok(())
    }
}

fn params(fail: bool) -> JobParameters {
    JobParameters::builder()
        .add_string("name", "foo")
        .add_string_with("fail", fail.to_string(), false)
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("partitioned_batch=info")),
        )
        .init();

    let store = Arc::new(MemoryExecutionStore::new());
    let config = BatchConfig::from_env()?.with_grid_size(3);
    let job = PartitionedJob::builder("partitionJob")
        .config(config)
        .store(store.clone())
        .partitioner(IndexedPartitioner::new())
        .unit_of_work(Tasklet)
        .build()?;
    let launcher = JobLauncher::new(store.clone());

    println!("Run 1 (fail=true)");
    let first = launcher.run(&job, &params(true)).await?;
    println!("   status: {}", first.status());
    if let Err(err) = first.into_result() {
        println!("   {err}");
    }

    println!("Run 2 (fail=false)");
    let second = launcher.run(&job, &params(false)).await?;
    println!("   status:      {}", second.status());
    println!("   skipped:     {:?}", second.step.skipped);
    println!("   re-executed: {:?}", second.step.executed_names());

    println!("History");
    let history = JobExplorer::new(store)
        .partition_history(&second.instance, job.step().name())
        .await?;
    for partition in history {
        let statuses: Vec<String> = partition
            .attempts
            .iter()
            .map(|attempt| attempt.status.to_string())
            .collect();
        println!("   {}: {}", partition.partition, statuses.join(" -> "));
    }

    Ok(())
}
