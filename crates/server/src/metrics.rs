//! Prometheus metrics
//!
//! Pipeline crates record through the `metrics` facade; this module installs
//! the Prometheus recorder once and renders it on `GET /metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const CONFIDENCE_BUCKETS: &[f64] = &[10.0, 25.0, 50.0, 60.0, 75.0, 90.0, 100.0];
const LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Install the global Prometheus recorder.
///
/// Returns `None` if a recorder is already installed by someone else.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Some(handle.clone());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("scripture_qa_confidence_score".to_string()),
            CONFIDENCE_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)
        });

    let builder = match builder {
        Ok(builder) => builder,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid histogram buckets, using summaries");
            PrometheusBuilder::new()
        },
    };

    match builder.install_recorder() {
        Ok(handle) => Some(HANDLE.get_or_init(|| handle).clone()),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        },
    }
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Record one HTTP request
pub fn record_request(route: &'static str, status: StatusCode, elapsed: Duration) {
    metrics::counter!(
        "scripture_qa_http_requests_total",
        "route" => route,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!("scripture_qa_http_request_duration_seconds", "route" => route)
        .record(elapsed.as_secs_f64());
}
