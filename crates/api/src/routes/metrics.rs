//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use messaging::OutboxStore;
use metrics_exporter_prometheus::PrometheusHandle;

/// State of the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub outbox: Arc<dyn OutboxStore>,
}

/// GET /metrics — returns Prometheus-formatted metrics.
///
/// The outbox backlog is sampled on each scrape.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.outbox.pending_count().await {
        Ok(pending) => metrics::gauge!("outbox_pending").set(pending as f64),
        Err(e) => tracing::warn!(error = %e, "Could not sample outbox backlog"),
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
