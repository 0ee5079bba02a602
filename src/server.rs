//! HTTP endpoint serving the Prometheus exposition text, instrumented with
//! its own request count and latency.

use axum::http::header;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Instant;

use crate::metrics::{ENDPOINT_DURATION, ENDPOINT_REQUESTS};

pub fn router(endpoint: &str, handle: PrometheusHandle) -> Router {
    Router::new().route(
        endpoint,
        get(move || {
            let handle = handle.clone();
            async move {
                let start = Instant::now();
                ::metrics::counter!(ENDPOINT_REQUESTS).increment(1);
                let body = handle.render();
                ::metrics::histogram!(ENDPOINT_DURATION).record(start.elapsed().as_secs_f64());
                (
                    [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                    body,
                )
            }
        }),
    )
}
