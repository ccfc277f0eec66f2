//! Observability infrastructure for the monitoring service
//!
//! Provides:
//! - Prometheus metrics (inference latency, ingest counters, batch backlog)
//! - Structured JSON logging of domain events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for inference latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    inference_latency_seconds: Histogram,
    events_ingested: IntCounterVec,
    inference_dispatches: IntCounter,
    anomalies_detected: IntCounter,
    inference_errors: IntCounter,
    persistence_errors: IntCounter,
    pipeline_errors: IntCounterVec,
    rollups_saved: IntCounterVec,
    pending_batch_samples: IntGaugeVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            inference_latency_seconds: register_histogram!(
                "vibration_monitor_inference_latency_seconds",
                "Time spent normalizing and scoring one batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            events_ingested: register_int_counter_vec!(
                "vibration_monitor_events_ingested_total",
                "Raw sensor events processed by the ingestion worker",
                &["kind"]
            )
            .expect("Failed to register events_ingested"),

            inference_dispatches: register_int_counter!(
                "vibration_monitor_inference_dispatches_total",
                "Batches handed to the scoring model"
            )
            .expect("Failed to register inference_dispatches"),

            anomalies_detected: register_int_counter!(
                "vibration_monitor_anomalies_detected_total",
                "Batches whose score reached the machine threshold"
            )
            .expect("Failed to register anomalies_detected"),

            inference_errors: register_int_counter!(
                "vibration_monitor_inference_errors_total",
                "Scoring calls that failed or timed out"
            )
            .expect("Failed to register inference_errors"),

            persistence_errors: register_int_counter!(
                "vibration_monitor_persistence_errors_total",
                "Rollup or anomaly writes that failed"
            )
            .expect("Failed to register persistence_errors"),

            pipeline_errors: register_int_counter_vec!(
                "vibration_monitor_pipeline_errors_total",
                "Events whose processing reported an error",
                &["kind"]
            )
            .expect("Failed to register pipeline_errors"),

            rollups_saved: register_int_counter_vec!(
                "vibration_monitor_rollups_saved_total",
                "Rollup rows written",
                &["machine", "window"]
            )
            .expect("Failed to register rollups_saved"),

            pending_batch_samples: register_int_gauge_vec!(
                "vibration_monitor_pending_batch_samples",
                "Resampled readings waiting for the next inference batch",
                &["machine", "channel"]
            )
            .expect("Failed to register pending_batch_samples"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    pub fn inc_events_ingested(&self, kind: &str) {
        self.inner().events_ingested.with_label_values(&[kind]).inc();
    }

    pub fn inc_inference_dispatches(&self) {
        self.inner().inference_dispatches.inc();
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    pub fn inc_inference_errors(&self) {
        self.inner().inference_errors.inc();
    }

    pub fn inc_persistence_errors(&self) {
        self.inner().persistence_errors.inc();
    }

    pub fn inc_pipeline_errors(&self, kind: &str) {
        self.inner().pipeline_errors.with_label_values(&[kind]).inc();
    }

    pub fn inc_rollups_saved(&self, machine: &str, window: &str) {
        self.inner()
            .rollups_saved
            .with_label_values(&[machine, window])
            .inc();
    }

    /// Record the current backlog of one machine's channel
    pub fn set_pending_samples(&self, machine: &str, channel: &str, count: usize) {
        self.inner()
            .pending_batch_samples
            .with_label_values(&[machine, channel])
            .set(count as i64);
    }
}

/// Structured logger for monitoring events
///
/// Provides consistent JSON-formatted logging for rollups, anomalies
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    site: String,
}

impl StructuredLogger {
    pub fn new(site: impl Into<String>) -> Self {
        Self { site: site.into() }
    }

    /// Log an anomalous batch
    pub fn log_anomaly(&self, machine: &str, score: f64, threshold: f64) {
        warn!(
            event = "anomaly_detected",
            site = %self.site,
            machine = %machine,
            score = score,
            threshold = threshold,
            "Anomaly detected"
        );
    }

    /// Log an hourly rollup write
    pub fn log_hour_rollup(&self, machine: &str, left: f64, right: f64, temp: f64) {
        info!(
            event = "hour_rollup_saved",
            site = %self.site,
            machine = %machine,
            avg_left = left,
            avg_right = right,
            avg_temp = temp,
            "Hourly rollup saved"
        );
    }

    /// Log a daily rollup write
    pub fn log_day_rollup(&self, machine: &str, day: &str) {
        info!(
            event = "day_rollup_saved",
            site = %self.site,
            machine = %machine,
            day = %day,
            "Daily rollup saved"
        );
    }

    /// Log a batch consumed without a verdict
    pub fn log_batch_dropped(&self, machine: &str, batch_size: usize, reason: &str) {
        warn!(
            event = "batch_dropped",
            site = %self.site,
            machine = %machine,
            batch_size = batch_size,
            reason = %reason,
            "Batch drained without inference result"
        );
    }

    pub fn log_startup(&self, version: &str, model_version: &str) {
        info!(
            event = "monitor_started",
            site = %self.site,
            version = %version,
            model_version = %model_version,
            "Vibration monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            site = %self.site,
            reason = %reason,
            "Vibration monitor shutting down"
        );
    }
}
