// Integration tests for execution store outages

mod common;

use std::sync::Arc;

use common::{scenario_params, InstrumentedStore, RecordingWork};
use partitioned_batch::config::BatchConfig;
use partitioned_batch::execution::BatchStatus;
use partitioned_batch::launcher::{JobLauncher, PartitionedJob};
use partitioned_batch::partition::IndexedPartitioner;
use partitioned_batch::store::ExecutionStore;
use partitioned_batch::BatchError;
use pretty_assertions::assert_eq;

fn build_job(store: &InstrumentedStore, work: RecordingWork) -> PartitionedJob {
    PartitionedJob::builder("outageJob")
        .config(
            BatchConfig::default()
                .with_grid_size(3)
                .with_max_concurrency(1),
        )
        .store(Arc::new(store.clone()))
        .partitioner(IndexedPartitioner::new())
        .unit_of_work(work)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_outage_mid_run_aborts_and_restart_finishes_the_rest() {
    let store = InstrumentedStore::new();
    let work = RecordingWork::new();
    let job = build_job(&store, work.clone());
    let launcher = JobLauncher::new(Arc::new(store.clone()));
    let params = scenario_params(false);

    store.fail_partition_starts_after(1);
    let err = launcher.run(&job, &params).await.unwrap_err();
    assert!(matches!(err, BatchError::StoreUnavailable(_)), "{err}");
    assert!(err.is_fatal());
    assert_eq!(work.calls().len(), 1);

    let instance = store
        .find_job_instance("outageJob", &params)
        .await
        .unwrap()
        .unwrap();
    let manager = store
        .find_latest_step_execution(&instance, "managerStep")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.status, BatchStatus::Failed);
    assert!(manager.failure_reason().unwrap().contains("connection reset"));

    let partitions = store
        .list_step_executions(&instance, "managerStep")
        .await
        .unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].status, BatchStatus::Completed);
    let completed = partitions[0].partition_name.clone().unwrap();

    store.clear_faults();
    let report = launcher.run(&job, &params).await.unwrap();
    assert_eq!(report.status(), BatchStatus::Completed);
    assert_eq!(report.step.executed.len(), 2);
    assert!(report.step.skipped.contains(&completed));
    assert!(report.step.restarted.is_empty());
    assert_eq!(work.calls().len(), 3);
}

#[tokio::test]
async fn test_store_down_at_launch_runs_nothing() {
    let store = InstrumentedStore::new();
    let work = RecordingWork::new();
    let job = build_job(&store, work.clone());

    store.set_down(true);
    let err = JobLauncher::new(Arc::new(store.clone()))
        .run(&job, &scenario_params(false))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::StoreUnavailable(_)));
    assert!(work.calls().is_empty());
}
