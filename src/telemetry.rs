//! Telemetry logic.
//! Support tracing, metrics and logging.
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";
/// `path` label of requests no route matched.
const UNMATCHED_PATH: &str = "unmatched";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

    metrics::describe_counter!("http_requests_total", Unit::Count, "Requests served, by route and status.");
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Time spent serving a request."
    );
    metrics::describe_counter!(
        "auth_rejections_total",
        Unit::Count,
        "Rejected authentications, by reason."
    );

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Record count and latency of every request.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = path_label(&req);
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [("method", method.to_string()), ("path", path), ("status", status)];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

/// Route template of the request. Raw paths would give every unknown URL
/// its own series.
fn path_label(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_PATH, MatchedPath::as_str)
        .to_owned()
}
