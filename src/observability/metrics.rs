//! Metrics collection and exposition.
//!
//! The sink is a set of atomic counters incremented by handlers and read
//! by the metrics endpoint. Label sets (per-upstream counters) live in
//! concurrent maps so the hot path never takes a lock.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::http::response::status_class;
use crate::timeouts::TimeoutKind;

/// Upstream error buckets for `proxy_upstream_errors_total{type=...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorKind {
    Timeout,
    ConnectionRefused,
    Other,
}

impl UpstreamErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::ConnectionRefused => "connection_refused",
            UpstreamErrorKind::Other => "other",
        }
    }
}

const STATUS_CLASSES: [&str; 4] = ["2xx", "3xx", "4xx", "5xx"];
const TIMEOUT_KINDS: [TimeoutKind; 4] = [
    TimeoutKind::Connect,
    TimeoutKind::Read,
    TimeoutKind::Write,
    TimeoutKind::Total,
];

/// Counters and the request-duration summary.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    requests_total: AtomicU64,
    parse_errors_total: AtomicU64,
    responses_by_class: [AtomicU64; 4],
    duration_sum_micros: AtomicU64,
    duration_count: AtomicU64,
    bytes_sent_total: AtomicU64,
    upstream_requests: DashMap<String, AtomicU64>,
    upstream_errors: DashMap<(String, UpstreamErrorKind), AtomicU64>,
    timeout_errors: [AtomicU64; 4],
}

fn class_index(status: u16) -> usize {
    match status_class(status) {
        "2xx" => 0,
        "3xx" => 1,
        "4xx" => 2,
        _ => 3,
    }
}

fn timeout_index(kind: TimeoutKind) -> usize {
    match kind {
        TimeoutKind::Connect => 0,
        TimeoutKind::Read => 1,
        TimeoutKind::Write => 2,
        TimeoutKind::Total => 3,
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted request whose preamble parsed; returns the start
    /// instant for the duration summary.
    pub fn record_request_start(&self) -> Instant {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        Instant::now()
    }

    /// Record a completed exchange: duration, status class, bytes relayed
    /// to the client.
    pub fn record_request_done(&self, started: Instant, status: u16, bytes_sent: u64) {
        let elapsed = started.elapsed();
        self.duration_sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.duration_count.fetch_add(1, Ordering::Relaxed);
        self.responses_by_class[class_index(status)].fetch_add(1, Ordering::Relaxed);
        self.bytes_sent_total.fetch_add(bytes_sent, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the status class of a synthetic response (502/504) sent
    /// without a completed relay.
    pub fn record_response_status(&self, status: u16) {
        self.responses_by_class[class_index(status)].fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request routed toward an upstream, at selection time.
    pub fn record_upstream_request(&self, upstream: &str) {
        self.upstream_requests
            .entry(upstream.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self, upstream: &str, kind: UpstreamErrorKind) {
        self.upstream_errors
            .entry((upstream.to_string(), kind))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_error(&self, kind: TimeoutKind) {
        self.timeout_errors[timeout_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    // Introspection, used by the endpoint renderer and by tests.

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn parse_errors_total(&self) -> u64 {
        self.parse_errors_total.load(Ordering::Relaxed)
    }

    pub fn responses(&self, class: &str) -> u64 {
        STATUS_CLASSES
            .iter()
            .position(|c| *c == class)
            .map(|i| self.responses_by_class[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn duration_count(&self) -> u64 {
        self.duration_count.load(Ordering::Relaxed)
    }

    pub fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent_total.load(Ordering::Relaxed)
    }

    pub fn upstream_requests(&self, upstream: &str) -> u64 {
        self.upstream_requests
            .get(upstream)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn upstream_errors(&self, upstream: &str, kind: UpstreamErrorKind) -> u64 {
        self.upstream_errors
            .get(&(upstream.to_string(), kind))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn timeout_errors(&self, kind: TimeoutKind) -> u64 {
        self.timeout_errors[timeout_index(kind)].load(Ordering::Relaxed)
    }

    /// Render the Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);

        out.push_str("# TYPE proxy_requests_total counter\n");
        let _ = writeln!(out, "proxy_requests_total {}", self.requests_total());

        out.push_str("# TYPE proxy_requests_parse_errors_total counter\n");
        let _ = writeln!(
            out,
            "proxy_requests_parse_errors_total {}",
            self.parse_errors_total()
        );

        out.push_str("# TYPE proxy_responses_total counter\n");
        for (i, class) in STATUS_CLASSES.iter().enumerate() {
            let _ = writeln!(
                out,
                "proxy_responses_total{{status_class=\"{}\"}} {}",
                class,
                self.responses_by_class[i].load(Ordering::Relaxed)
            );
        }

        out.push_str("# TYPE proxy_request_duration_seconds summary\n");
        let sum = self.duration_sum_micros.load(Ordering::Relaxed) as f64 / 1e6;
        let _ = writeln!(out, "proxy_request_duration_seconds_sum {:.6}", sum);
        let _ = writeln!(
            out,
            "proxy_request_duration_seconds_count {}",
            self.duration_count()
        );

        out.push_str("# TYPE proxy_bytes_sent_total counter\n");
        let _ = writeln!(out, "proxy_bytes_sent_total {}", self.bytes_sent_total());

        out.push_str("# TYPE proxy_upstream_requests_total counter\n");
        let mut upstream_counts: Vec<(String, u64)> = self
            .upstream_requests
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        upstream_counts.sort();
        for (upstream, count) in upstream_counts {
            let _ = writeln!(
                out,
                "proxy_upstream_requests_total{{upstream=\"{}\"}} {}",
                upstream, count
            );
        }

        out.push_str("# TYPE proxy_upstream_errors_total counter\n");
        let mut error_counts: Vec<(String, &'static str, u64)> = self
            .upstream_errors
            .iter()
            .map(|e| {
                let (upstream, kind) = e.key();
                (upstream.clone(), kind.as_str(), e.value().load(Ordering::Relaxed))
            })
            .collect();
        error_counts.sort();
        for (upstream, kind, count) in error_counts {
            let _ = writeln!(
                out,
                "proxy_upstream_errors_total{{upstream=\"{}\",type=\"{}\"}} {}",
                upstream, kind, count
            );
        }

        out.push_str("# TYPE proxy_timeout_errors_total counter\n");
        for kind in TIMEOUT_KINDS {
            let _ = writeln!(
                out,
                "proxy_timeout_errors_total{{type=\"{}\"}} {}",
                kind.as_str(),
                self.timeout_errors(kind)
            );
        }

        out
    }
}

async fn metrics_handler(State(metrics): State<Arc<ProxyMetrics>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics.render(),
    )
}

/// Serve `GET /metrics` on the given listener until shutdown fires.
pub async fn serve_metrics(
    listener: tokio::net::TcpListener,
    metrics: Arc<ProxyMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
