/// Metrics and telemetry for the archive insights worker
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Job execution (in flight, completed, failed, duration)
/// - Archive invalidations by error code
/// - Stat store batch writes
/// - Account deletion sub-step failures

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};

lazy_static! {
    // ========== Job Metrics ==========

    /// Jobs currently executing, by task
    pub static ref JOBS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "jobs_in_flight",
        "Number of jobs currently executing",
        &["task"]
    )
    .unwrap();

    /// Successfully completed jobs, by task
    pub static ref JOBS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_completed_total",
        "Total number of jobs that completed successfully",
        &["task"]
    )
    .unwrap();

    /// Failed jobs, by task and failure class
    pub static ref JOBS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_failed_total",
        "Total number of jobs that failed",
        &["task", "class"]
    )
    .unwrap();

    /// Job duration in seconds
    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "job_duration_seconds",
        "Job execution time in seconds",
        &["task"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    )
    .unwrap();

    /// Jobs enqueued, by task
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_enqueued_total",
        "Total number of jobs enqueued",
        &["task"]
    )
    .unwrap();

    /// Configured worker concurrency
    pub static ref WORKER_MAX_CONCURRENCY: IntGauge = register_int_gauge!(
        "worker_max_concurrency",
        "Maximum number of concurrently executing jobs"
    )
    .unwrap();

    // ========== Archive Metrics ==========

    /// Archives moved to invalid, by error code
    pub static ref ARCHIVES_INVALIDATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "archives_invalidated_total",
        "Total number of archives marked invalid",
        &["code"]
    )
    .unwrap();

    /// Archives fully processed
    pub static ref ARCHIVES_PROCESSED_TOTAL: IntCounter = register_int_counter!(
        "archives_processed_total",
        "Total number of archives processed"
    )
    .unwrap();

    /// Parse sub-step failures, by entity kind
    pub static ref PARSE_STEP_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "parse_step_failures_total",
        "Total number of failed parse sub-steps",
        &["entity"]
    )
    .unwrap();

    // ========== Storage Metrics ==========

    /// Stat store batches written
    pub static ref STAT_BATCHES_TOTAL: IntCounter = register_int_counter!(
        "stat_batches_total",
        "Total number of stat store batch writes"
    )
    .unwrap();

    /// Stat items written
    pub static ref STAT_ITEMS_TOTAL: IntCounter = register_int_counter!(
        "stat_items_total",
        "Total number of stat items written"
    )
    .unwrap();

    /// Account deletion sub-step failures, by step
    pub static ref DELETION_STEP_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "deletion_step_failures_total",
        "Total number of failed account deletion sub-steps",
        &["step"]
    )
    .unwrap();
}

/// Render all metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

/// Mark a job as started
pub fn record_job_started(task: &str) {
    JOBS_IN_FLIGHT.with_label_values(&[task]).inc();
}

/// Mark a job as finished; `failure_class` is `None` on success
pub fn record_job_finished(task: &str, failure_class: Option<&str>, duration: f64) {
    JOBS_IN_FLIGHT.with_label_values(&[task]).dec();
    JOB_DURATION_SECONDS.with_label_values(&[task]).observe(duration);
    match failure_class {
        None => JOBS_COMPLETED_TOTAL.with_label_values(&[task]).inc(),
        Some(class) => JOBS_FAILED_TOTAL.with_label_values(&[task, class]).inc(),
    }
}

/// Record a job enqueue
pub fn record_job_enqueued(task: &str) {
    JOBS_ENQUEUED_TOTAL.with_label_values(&[task]).inc();
}

/// Record an archive invalidation
pub fn record_archive_invalidated(code: &str) {
    ARCHIVES_INVALIDATED_TOTAL.with_label_values(&[code]).inc();
}

/// Record a processed archive
pub fn record_archive_processed() {
    ARCHIVES_PROCESSED_TOTAL.inc();
}

/// Record a failed parse sub-step
pub fn record_parse_step_failure(entity: &str) {
    PARSE_STEP_FAILURES_TOTAL.with_label_values(&[entity]).inc();
}

/// Record a stat store batch write
pub fn record_stat_batch(items: u64) {
    STAT_BATCHES_TOTAL.inc();
    STAT_ITEMS_TOTAL.inc_by(items);
}

/// Record a failed deletion sub-step
pub fn record_deletion_step_failure(step: &str) {
    DELETION_STEP_FAILURES_TOTAL.with_label_values(&[step]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_job_lifecycle() {
        record_job_started("parse_archive");
        record_job_finished("parse_archive", None, 0.5);
        record_job_started("parse_archive");
        record_job_finished("parse_archive", Some("transient"), 0.1);

        let metrics = render_metrics();
        assert!(metrics.contains("jobs_completed_total"));
        assert!(metrics.contains("jobs_failed_total"));
        assert!(metrics.contains("job_duration_seconds"));
    }

    #[test]
    fn test_record_archive_invalidated() {
        record_archive_invalidated("INVALID_ARCHIVE");
        let metrics = render_metrics();
        assert!(metrics.contains("archives_invalidated_total"));
        assert!(metrics.contains("INVALID_ARCHIVE"));
    }

    #[test]
    fn test_record_stat_batch() {
        record_stat_batch(25);
        let metrics = render_metrics();
        assert!(metrics.contains("stat_batches_total"));
        assert!(metrics.contains("stat_items_total"));
    }
}
