//! Prometheus metrics and the `/metrics` + `/health` HTTP server.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Reconcile counters and timings, labelled by kind
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciliations = IntCounterVec::new(
            Opts::new("fleet_reconciliations_total", "Reconcile passes"),
            &["kind"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("fleet_reconcile_failures_total", "Failed reconcile passes"),
            &["kind", "error"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("fleet_reconcile_duration_seconds", "Reconcile pass duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0]),
            &["kind"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { registry, reconciliations, failures, duration })
    }

    /// Count a pass and time it until the returned guard drops.
    pub fn count_and_measure(&self, kind: &'static str) -> ReconcileTimer {
        self.reconciliations.with_label_values(&[kind]).inc();
        ReconcileTimer { histogram: self.duration.clone(), kind, start: Instant::now() }
    }

    pub fn reconcile_failure(&self, kind: &str, error: &str) {
        self.failures.with_label_values(&[kind, error]).inc();
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition of all metrics
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Observes the pass duration on drop
pub struct ReconcileTimer {
    histogram: HistogramVec,
    kind: &'static str,
    start: Instant,
}

impl Drop for ReconcileTimer {
    fn drop(&mut self) {
        self.histogram
            .with_label_values(&[self.kind])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Router for the metrics server
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", routing::get(metrics_handler))
        .route("/health", routing::get(health))
        .with_state(metrics)
}

/// Serve `/metrics` and `/health` until the listener fails.
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(buffer) => (StatusCode::OK, buffer),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string().into_bytes()),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json("healthy"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_rendered() {
        let metrics = Metrics::new().unwrap();
        {
            let _timer = metrics.count_and_measure("cluster");
        }
        metrics.reconcile_failure("cluster", "cloud");

        let text = String::from_utf8(metrics.render().unwrap()).unwrap();
        assert!(text.contains("fleet_reconciliations_total{kind=\"cluster\"} 1"));
        assert!(text.contains("fleet_reconcile_failures_total{error=\"cloud\",kind=\"cluster\"} 1"));
        assert!(text.contains("fleet_reconcile_duration_seconds_count{kind=\"cluster\"} 1"));
    }
}
