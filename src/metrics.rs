//! Metrics collection for partitioned steps
//!
//! Provides Prometheus-compatible metrics for partition throughput,
//! failures, restarts and manager outcomes.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Instant;

use crate::execution::BatchStatus;

lazy_static! {
    /// Counter for partition executions by terminal status
    static ref PARTITION_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "partitioned_batch_partition_executions_total",
        "Total number of partition executions",
        &["step", "status"]
    ).unwrap();

    /// Histogram for partition duration
    static ref PARTITION_DURATION: HistogramVec = register_histogram_vec!(
        "partitioned_batch_partition_duration_seconds",
        "Partition execution duration in seconds",
        &["step"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).unwrap();

    /// Gauge for partitions currently holding a worker slot
    static ref ACTIVE_PARTITIONS: IntGauge = register_int_gauge!(
        "partitioned_batch_active_partitions",
        "Number of partitions currently executing"
    ).unwrap();

    /// Counter for partitions skipped because they already completed
    static ref SKIPPED_PARTITIONS: IntCounterVec = register_int_counter_vec!(
        "partitioned_batch_skipped_partitions_total",
        "Partitions skipped on restart because they already completed",
        &["step"]
    ).unwrap();

    /// Counter for manager step outcomes
    static ref MANAGER_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "partitioned_batch_manager_executions_total",
        "Total number of manager step executions",
        &["step", "status"]
    ).unwrap();
}

/// Metrics collector bound to one manager step
#[derive(Debug, Clone)]
pub struct StepMetrics {
    step: String,
}

impl StepMetrics {
    /// Create a collector for a step
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    /// A partition acquired a worker slot
    pub fn partition_started(&self) {
        ACTIVE_PARTITIONS.inc();
    }

    /// A partition released its worker slot
    pub fn partition_finished(&self, status: BatchStatus, duration_secs: f64) {
        ACTIVE_PARTITIONS.dec();
        PARTITION_EXECUTIONS
            .with_label_values(&[&self.step, status.as_str()])
            .inc();
        PARTITION_DURATION
            .with_label_values(&[&self.step])
            .observe(duration_secs);
    }

    /// Partitions skipped by the splitter
    pub fn partitions_skipped(&self, count: usize) {
        SKIPPED_PARTITIONS
            .with_label_values(&[&self.step])
            .inc_by(count as u64);
    }

    /// Manager step reached a terminal status
    pub fn manager_finished(&self, status: BatchStatus) {
        MANAGER_EXECUTIONS
            .with_label_values(&[&self.step, status.as_str()])
            .inc();
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in seconds
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Elapsed time as a duration
    #[inline]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e).into())
}
