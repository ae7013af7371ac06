//! Prometheus metrics for the synchronization loops
//!
//! This module tracks:
//! - Transmission: guides sent per outcome, remote failures per kind
//! - Field monitor: guides finalized per reason, resends
//! - Pull monitor: fields reconciled, skipped cycles, page failures
//! - Token manager: authentications per scope and outcome
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all sync metrics
struct SyncMetrics {
    transmissions: CounterVec,
    remote_failures: CounterVec,
    finalized: CounterVec,
    resends: CounterVec,
    pull_fields_updated: CounterVec,
    pull_cycles_skipped: Counter,
    pull_page_failures: Counter,
    authentications: CounterVec,
    cycle_duration: HistogramVec,
}

/// Global storage for sync metrics
static SYNC_METRICS: OnceLock<SyncMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Should be called once at application startup. If registration fails the
/// error is returned and subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = guia_sync::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SyncMetrics {
        transmissions: register_counter_vec!(
            "guia_sync_transmissions_total",
            "Guides processed by the transmission scheduler, by outcome",
            &["outcome"]
        )?,
        remote_failures: register_counter_vec!(
            "guia_sync_remote_failures_total",
            "Remote call failures by operation and failure kind",
            &["operation", "kind"]
        )?,
        finalized: register_counter_vec!(
            "guia_sync_guides_finalized_total",
            "Guides whose observation was finalized, by reason",
            &["reason"]
        )?,
        resends: register_counter_vec!(
            "guia_sync_field_resends_total",
            "Field monitor re-transmissions by trigger and outcome",
            &["trigger", "outcome"]
        )?,
        pull_fields_updated: register_counter_vec!(
            "guia_sync_pull_fields_updated_total",
            "Local fields overwritten by pull reconciliation",
            &["field"]
        )?,
        pull_cycles_skipped: register_counter!(
            "guia_sync_pull_cycles_skipped_total",
            "Pull cycles skipped by the minimum spacing rule"
        )?,
        pull_page_failures: register_counter!(
            "guia_sync_pull_page_failures_total",
            "Export pages that failed during pull reconciliation"
        )?,
        authentications: register_counter_vec!(
            "guia_sync_authentications_total",
            "Token authentications by scope and outcome",
            &["scope", "outcome"]
        )?,
        cycle_duration: register_histogram_vec!(
            "guia_sync_cycle_duration_seconds",
            "Duration of one loop cycle in seconds",
            &["loop"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
    };

    SYNC_METRICS
        .set(metrics)
        .map_err(|_| "Sync metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SYNC_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record scheduler outcomes for a batch (`transmitted`, `retry`, `error`, `payload_error`)
pub fn record_transmissions(outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SYNC_METRICS.get() {
        m.transmissions
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Record a failed remote call
pub fn record_remote_failure(operation: &str, kind: &str) {
    if let Some(m) = SYNC_METRICS.get() {
        m.remote_failures.with_label_values(&[operation, kind]).inc();
    }
}

/// Record a finalized guide (`terminal`, `attempts`, `password`, `forced`)
pub fn record_finalized(reason: &str) {
    if let Some(m) = SYNC_METRICS.get() {
        m.finalized.with_label_values(&[reason]).inc();
    }
}

/// Record a field monitor resend
pub fn record_resend(trigger: &str, outcome: &str) {
    if let Some(m) = SYNC_METRICS.get() {
        m.resends.with_label_values(&[trigger, outcome]).inc();
    }
}

/// Record fields overwritten by the pull monitor
pub fn record_pull_fields(fields: &[&str]) {
    let Some(m) = SYNC_METRICS.get() else {
        return;
    };

    for field in fields {
        m.pull_fields_updated.with_label_values(&[field]).inc();
    }
}

/// Record a pull cycle skipped by the conflict guard
pub fn record_pull_skipped() {
    if let Some(m) = SYNC_METRICS.get() {
        m.pull_cycles_skipped.inc();
    }
}

/// Record a failed export page
pub fn record_pull_page_failure() {
    if let Some(m) = SYNC_METRICS.get() {
        m.pull_page_failures.inc();
    }
}

/// Record an authentication attempt
pub fn record_authentication(scope: &str, success: bool) {
    if let Some(m) = SYNC_METRICS.get() {
        let outcome = if success { "success" } else { "failure" };
        m.authentications.with_label_values(&[scope, outcome]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a cycle timer for one loop (`transmission`, `field_monitor`, `pull_monitor`)
pub fn start_cycle_timer(loop_name: &str) -> MetricsTimer {
    match SYNC_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.cycle_duration
                .with_label_values(&[loop_name])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
