//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Order queue outcomes and latencies
//! - Prerequisite transaction resolutions

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{QueueStatus, TransactionStatus};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "order_coordinator_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "order_coordinator_chain_block_height",
        "Last block height seen per chain",
        &["chain_id"]
    ).unwrap();

    // Order metrics
    pub static ref ORDERS_STARTED: CounterVec = register_counter_vec!(
        "order_coordinator_orders_started_total",
        "Orders recorded as waiting",
        &["chain_id"]
    ).unwrap();

    pub static ref ORDERS_FINISHED: CounterVec = register_counter_vec!(
        "order_coordinator_orders_finished_total",
        "Orders by terminal queue status",
        &["queue_status"]
    ).unwrap();

    pub static ref ORDERS_IN_FLIGHT: Gauge = register_gauge!(
        "order_coordinator_orders_in_flight",
        "Coordinations currently running"
    ).unwrap();

    pub static ref PREREQUISITE_WAIT: HistogramVec = register_histogram_vec!(
        "order_coordinator_prerequisite_wait_seconds",
        "Time from queueing until prerequisites resolved",
        &[],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    pub static ref SUBMISSION_LATENCY: HistogramVec = register_histogram_vec!(
        "order_coordinator_submission_latency_seconds",
        "Matching service round trip",
        &[],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Prerequisite transaction metrics
    pub static ref PREREQUISITES_RESOLVED: CounterVec = register_counter_vec!(
        "order_coordinator_prerequisites_resolved_total",
        "Prerequisite transactions resolved from receipts",
        &["chain_id", "status"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "order_coordinator_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "order_coordinator_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Encode the default registry in the text exposition format
pub fn render() -> CoordinatorResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| CoordinatorError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_order_started(chain_id: u64) {
    ORDERS_STARTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_order_outcome(status: QueueStatus) {
    ORDERS_FINISHED
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn record_in_flight(count: usize) {
    ORDERS_IN_FLIGHT.set(count as f64);
}

pub fn record_prerequisite_wait(wait_secs: f64) {
    PREREQUISITE_WAIT.with_label_values(&[]).observe(wait_secs);
}

pub fn record_submission_latency(latency_secs: f64) {
    SUBMISSION_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_prerequisite_resolved(chain_id: u64, status: TransactionStatus) {
    PREREQUISITES_RESOLVED
        .with_label_values(&[&chain_id.to_string(), status.as_str()])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_outcomes() {
        record_order_outcome(QueueStatus::WrapFailed);
        record_prerequisite_resolved(137, TransactionStatus::Success);

        let text = render().unwrap();
        assert!(text.contains("order_coordinator_orders_finished_total"));
        assert!(text.contains("queue_status=\"wrapFailed\""));
        assert!(text.contains("chain_id=\"137\""));
    }
}
