//! HTTP API and process wiring for the order pipeline.
//!
//! Provides REST endpoints for order submission and customer debt, outbox
//! replay, the realtime hub WebSocket endpoint, structured logging (tracing)
//! and Prometheus metrics. [`pipeline::Pipeline`] assembles the stores,
//! broker and background workers.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use messaging::OutboxStore;
use metrics_exporter_prometheus::PrometheusHandle;
use notifications::NotificationHub;
use orders::OrderService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub outbox: Arc<dyn OutboxStore>,
    pub hub: Arc<NotificationHub>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(routes::metrics::MetricsState {
            handle: metrics_handle,
            outbox: state.outbox.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::submit))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/customers/{id}/debt", get(routes::customers::debt))
        .route("/customers/{id}/repayments", post(routes::customers::repay))
        .route("/outbox/{id}/replay", post(routes::outbox::replay))
        .route("/hub", get(routes::hub::upgrade))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
