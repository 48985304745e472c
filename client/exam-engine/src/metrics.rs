use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Submission Metrics
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_submissions_total",
        "Submission attempts by outcome",
        &["trigger", "outcome"]
    )
    .unwrap();

    // Snapshot Store Metrics
    pub static ref AUTOSAVE_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_autosave_writes_total",
        "Snapshot writes by status",
        &["status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "exam_store_operation_duration_seconds",
        "Snapshot store operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5]
    )
    .unwrap();

    // Session Metrics
    pub static ref RECOVERY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_recovery_total",
        "Session entries by recovery path",
        &["path"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "exam_sessions_active",
        "Exam sessions currently open in this process"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: time a snapshot store operation
pub async fn track_store_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(start.elapsed().as_secs_f64());

    result
}

pub fn record_submission(trigger: &str, outcome: &str) {
    SUBMISSIONS_TOTAL
        .with_label_values(&[trigger, outcome])
        .inc();
}

pub fn record_recovery(path: &str) {
    RECOVERY_TOTAL.with_label_values(&[path]).inc();
}
