//! Metrics definitions for the media controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `media_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: request methods (~13 values)
//! - `status`: `success` or an error label (~8 values)
//! - `reason`: collection reasons (`unreferenced`, `forced`, `released`, `shutdown`)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the render handle.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Request latency: control-plane calls, dominated by engine time
        .set_buckets_for_metric(
            Matcher::Prefix("media_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of live media objects.
///
/// Metric: `media_objects_active`
pub fn set_objects_active(count: usize) {
    // usize to f64 conversion is safe for realistic object counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("media_objects_active").set(count as f64);
}

/// Set the number of live sessions.
///
/// Metric: `media_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("media_sessions_active").set(count as f64);
}

/// Set the number of live subscriptions.
///
/// Metric: `media_subscriptions_active`
pub fn set_subscriptions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("media_subscriptions_active").set(count as f64);
}

// ============================================================================
// Requests
// ============================================================================

/// Record one processed request.
///
/// Metrics: `media_requests_total`, `media_request_duration_seconds`
/// Labels: `method`, `status`
pub fn record_request(method: &'static str, status: &'static str, duration: Duration) {
    counter!("media_requests_total", "method" => method, "status" => status).increment(1);
    histogram!("media_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

/// Record a response served from the request cache.
///
/// Metric: `media_request_replays_total`
pub fn record_request_replay() {
    counter!("media_request_replays_total").increment(1);
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Record objects removed from the registry.
///
/// Metric: `media_objects_collected_total`
/// Labels: `reason`
pub fn record_objects_collected(reason: &'static str, count: usize) {
    if count > 0 {
        counter!("media_objects_collected_total", "reason" => reason).increment(count as u64);
    }
}

/// Record a construction rejected by admission control.
///
/// Metric: `media_admission_rejected_total`
pub fn record_admission_rejected() {
    counter!("media_admission_rejected_total").increment(1);
}

/// Record event deliveries (one per handler).
///
/// Metric: `media_events_delivered_total`
pub fn record_events_delivered(count: usize) {
    counter!("media_events_delivered_total").increment(count as u64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_recorded() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // Recorders are global; ignore failure if another test installed one.
        let _ = recorder.install();

        set_objects_active(3);
        set_sessions_active(2);
        set_subscriptions_active(1);
        record_request("create", "success", Duration::from_millis(4));
        record_request_replay();
        record_objects_collected("unreferenced", 2);
        record_objects_collected("forced", 0);
        record_admission_rejected();
        record_events_delivered(1);

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        // Only meaningful when this test's recorder won the install race.
        if !names.is_empty() {
            assert!(names.iter().any(|n| n == "media_requests_total"));
            assert!(names.iter().any(|n| n == "media_objects_active"));
            assert!(names.iter().any(|n| n == "media_objects_collected_total"));
        }
    }
}
