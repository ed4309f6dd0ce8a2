//! HTTP endpoint exposing nwpd metrics
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Expose metrics for collection
//! - SI-4: System Monitoring - Liveness endpoint for supervisors
//!
//! Served over plain HTTP; bind it to a loopback or management address.

use crate::metrics::MetricsCollector;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::{error, info};

#[derive(Clone)]
struct MetricsServerState {
    collector: MetricsCollector,
}

fn router(collector: MetricsCollector) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(MetricsServerState { collector })
}

/// Serve `/metrics` and `/health` on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, collector: MetricsCollector) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");
    axum::serve(listener, router(collector)).await
}

/// Handle /metrics endpoint - Prometheus text format
///
/// # NIST Controls
/// - AU-6: Audit Record Review - Provide metrics in Prometheus format
async fn metrics_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.collector.registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    let body = format!("ok neighbors={}\n", state.collector.neighbors.get());
    (StatusCode::OK, [("content-type", "text/plain")], body)
}
