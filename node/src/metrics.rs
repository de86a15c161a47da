//! # Prometheus Metrics
//!
//! Operational metrics for the relay, scraped at `/metrics` on the
//! configured metrics port. Metrics are driven entirely by the protocol
//! layer's [`RelayEvent`] stream: [`record_events`] subscribes once at
//! startup and translates each event into counter/gauge/histogram updates.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `mapp` namespace.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::broadcast;

use mapp_protocol::RelayEvent;

/// Holds all Prometheus metric handles for the relay.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub sessions_created_total: IntCounter,
    pub sessions_joined_total: IntCounter,
    pub sessions_expired_total: IntCounter,
    /// Submissions accepted and handed to the ledger.
    pub submissions_total: IntCounter,
    pub submissions_failed_total: IntCounter,
    /// Frames rejected as malformed or out of protocol.
    pub protocol_errors_total: IntCounter,
    pub active_connections: IntGauge,
    /// Co-sign through confirmation, in seconds.
    pub submission_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("mapp".into()), None)?;

        let sessions_created_total = IntCounter::new(
            "sessions_created_total",
            "Total number of payment sessions created",
        )?;
        registry.register(Box::new(sessions_created_total.clone()))?;

        let sessions_joined_total = IntCounter::new(
            "sessions_joined_total",
            "Total number of sessions joined by a client",
        )?;
        registry.register(Box::new(sessions_joined_total.clone()))?;

        let sessions_expired_total = IntCounter::new(
            "sessions_expired_total",
            "Total number of sessions that expired before a client joined",
        )?;
        registry.register(Box::new(sessions_expired_total.clone()))?;

        let submissions_total = IntCounter::new(
            "submissions_total",
            "Total number of signed transactions accepted for submission",
        )?;
        registry.register(Box::new(submissions_total.clone()))?;

        let submissions_failed_total = IntCounter::new(
            "submissions_failed_total",
            "Total number of submissions that did not confirm",
        )?;
        registry.register(Box::new(submissions_failed_total.clone()))?;

        let protocol_errors_total = IntCounter::new(
            "protocol_errors_total",
            "Total number of frames rejected as protocol violations",
        )?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        let active_connections =
            IntGauge::new("active_connections", "Number of open WebSocket connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        let submission_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "submission_latency_seconds",
                "Co-sign, broadcast and confirmation latency in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(submission_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            sessions_created_total,
            sessions_joined_total,
            sessions_expired_total,
            submissions_total,
            submissions_failed_total,
            protocol_errors_total,
            active_connections,
            submission_latency_seconds,
        })
    }

    /// Apply one relay event.
    pub fn observe(&self, event: &RelayEvent) {
        match event {
            RelayEvent::ConnectionOpened { .. } => self.active_connections.inc(),
            RelayEvent::ConnectionClosed { .. } => self.active_connections.dec(),
            RelayEvent::SessionCreated { .. } => self.sessions_created_total.inc(),
            RelayEvent::SessionJoined { .. } => self.sessions_joined_total.inc(),
            RelayEvent::SessionExpired { .. } => self.sessions_expired_total.inc(),
            RelayEvent::SubmissionStarted { .. } => self.submissions_total.inc(),
            RelayEvent::SubmissionFinished {
                success, elapsed, ..
            } => {
                self.submission_latency_seconds
                    .observe(elapsed.as_secs_f64());
                if !success {
                    self.submissions_failed_total.inc();
                }
            }
            RelayEvent::ProtocolViolation { .. } => self.protocol_errors_total.inc(),
            RelayEvent::SessionPurged { .. } => {}
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Drain relay events into `metrics` until the bus closes.
pub async fn record_events(metrics: SharedMetrics, mut events: broadcast::Receiver<RelayEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => metrics.observe(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "metrics consumer lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// Router for the metrics port.
pub fn metrics_router(metrics: SharedMetrics) -> axum::Router {
    axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(metrics)
}
