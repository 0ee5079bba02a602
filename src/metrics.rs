//! Metric aggregation: one bundle of instruments per namespace, fanned out
//! to the pull-based Prometheus registry and, when configured, mirrored to
//! the push-based statsd sink.
//!
//! The recorder is installed once at startup; duration metrics exist twice,
//! as a quantile summary and as a fixed-bucket histogram of the same samples
//! (the `_hist` names get real buckets, the bare names render as summaries).

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::config::{Config, NamespaceConfig};
use crate::error::{ExporterError, Result};
use crate::labels::{LabelSchema, LabelVector};
use crate::relabel::RelabelSchema;
use crate::statsd::StatsdClient;

/// Global handle for the Prometheus exporter, stored for endpoint rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Self-instrumentation of the scrape endpoint.
pub const ENDPOINT_REQUESTS: &str = "exporter_http_requests_total";
pub const ENDPOINT_DURATION: &str = "exporter_http_request_duration_seconds";

fn endpoint_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
}

/// Install the global Prometheus recorder. Histogram buckets are fixed per
/// namespace metric name up front; summaries render with the 0.5/0.9/0.99
/// quantiles.
pub fn install_recorder(cfg: &Config) -> Result<PrometheusHandle> {
    let mut builder = PrometheusBuilder::new()
        .set_quantiles(&[0.5, 0.9, 0.99])
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;

    for ns in &cfg.namespaces {
        let names = MetricNames::new(ns.metric_prefix());
        for hist_name in [&names.upstream_seconds_hist, &names.response_seconds_hist] {
            builder = builder
                .set_buckets_for_metric(
                    Matcher::Full(hist_name.clone()),
                    &ns.histogram_buckets,
                )
                .map_err(|e| ExporterError::Metrics(e.to_string()))?;
        }
    }

    builder = builder
        .set_buckets_for_metric(
            Matcher::Full(ENDPOINT_DURATION.to_string()),
            &endpoint_duration_buckets(),
        )
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;

    let handle = builder
        .install_recorder()
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;

    if METRICS_HANDLE.set(handle.clone()).is_err() {
        return Err(ExporterError::Metrics(
            "metrics recorder already installed".to_string(),
        ));
    }
    Ok(handle)
}

pub fn handle() -> Option<PrometheusHandle> {
    METRICS_HANDLE.get().cloned()
}

/// Pull-side metric names for one namespace.
pub struct MetricNames {
    pub count_total: String,
    pub size_bytes: String,
    pub upstream_seconds: String,
    pub upstream_seconds_hist: String,
    pub response_seconds: String,
    pub response_seconds_hist: String,
    pub parse_errors_total: String,
}

impl MetricNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            count_total: format!("{}_http_response_count_total", prefix),
            size_bytes: format!("{}_http_response_size_bytes", prefix),
            upstream_seconds: format!("{}_http_upstream_time_seconds", prefix),
            upstream_seconds_hist: format!("{}_http_upstream_time_seconds_hist", prefix),
            response_seconds: format!("{}_http_response_time_seconds", prefix),
            response_seconds_hist: format!("{}_http_response_time_seconds_hist", prefix),
            parse_errors_total: format!("{}_parse_errors_total", prefix),
        }
    }
}

/// Push-side metric names for one namespace.
struct StatsdNames {
    count: String,
    size: String,
    upstream: String,
    response: String,
}

impl StatsdNames {
    fn new(namespace: &str) -> Self {
        Self {
            count: format!("{}.http.response.count_total", namespace),
            size: format!("{}.http.response.size_bytes", namespace),
            upstream: format!("{}.http.upstream.time_seconds", namespace),
            response: format!("{}.http.response.time_seconds", namespace),
        }
    }
}

/// The per-namespace metric bundle. Created once at namespace startup and
/// shared by all of that namespace's workers; lives until process exit.
pub struct NamespaceMetrics {
    names: MetricNames,
    statsd_names: StatsdNames,
    labels: LabelSchema,
    statsd: Option<Arc<StatsdClient>>,
}

impl NamespaceMetrics {
    pub fn new(
        ns: &NamespaceConfig,
        relabel: &RelabelSchema,
        statsd: Option<Arc<StatsdClient>>,
    ) -> Self {
        let names = MetricNames::new(ns.metric_prefix());

        metrics::describe_counter!(
            names.count_total.clone(),
            "Amount of processed HTTP requests"
        );
        metrics::describe_counter!(
            names.size_bytes.clone(),
            "Total amount of transferred bytes"
        );
        metrics::describe_histogram!(
            names.upstream_seconds.clone(),
            "Time needed by upstream servers to handle requests"
        );
        metrics::describe_histogram!(
            names.upstream_seconds_hist.clone(),
            "Time needed by upstream servers to handle requests"
        );
        metrics::describe_histogram!(
            names.response_seconds.clone(),
            "Time needed by the web server to handle requests"
        );
        metrics::describe_histogram!(
            names.response_seconds_hist.clone(),
            "Time needed by the web server to handle requests"
        );
        metrics::describe_counter!(
            names.parse_errors_total.clone(),
            "Total number of log lines that could not be parsed"
        );

        Self {
            names,
            statsd_names: StatsdNames::new(&ns.name),
            labels: LabelSchema::new(ns, relabel),
            statsd,
        }
    }

    pub fn label_schema(&self) -> &LabelSchema {
        &self.labels
    }

    /// Every successfully parsed line increments the count exactly once.
    pub fn inc_count(&self, vector: &LabelVector, tags: &[String]) {
        metrics::counter!(
            self.names.count_total.clone(),
            self.labels.metric_labels(vector)
        )
        .increment(1);
        if let Some(statsd) = &self.statsd {
            statsd.incr(&self.statsd_names.count, tags);
        }
    }

    pub fn add_bytes(&self, vector: &LabelVector, tags: &[String], bytes: f64) {
        metrics::counter!(
            self.names.size_bytes.clone(),
            self.labels.metric_labels(vector)
        )
        .increment(bytes as u64);
        if let Some(statsd) = &self.statsd {
            statsd.count(&self.statsd_names.size, bytes as i64, tags);
        }
    }

    pub fn observe_upstream(&self, vector: &LabelVector, tags: &[String], seconds: f64) {
        // summary and fixed-bucket histogram record the same sample
        metrics::histogram!(
            self.names.upstream_seconds.clone(),
            self.labels.metric_labels(vector)
        )
        .record(seconds);
        metrics::histogram!(
            self.names.upstream_seconds_hist.clone(),
            self.labels.metric_labels(vector)
        )
        .record(seconds);
        if let Some(statsd) = &self.statsd {
            statsd.histogram(&self.statsd_names.upstream, seconds, tags);
        }
    }

    pub fn observe_response(&self, vector: &LabelVector, tags: &[String], seconds: f64) {
        metrics::histogram!(
            self.names.response_seconds.clone(),
            self.labels.metric_labels(vector)
        )
        .record(seconds);
        metrics::histogram!(
            self.names.response_seconds_hist.clone(),
            self.labels.metric_labels(vector)
        )
        .record(seconds);
        if let Some(statsd) = &self.statsd {
            statsd.histogram(&self.statsd_names.response, seconds, tags);
        }
    }

    /// Unparseable lines are only counted; no labeled metrics are emitted.
    pub fn inc_parse_errors(&self) {
        metrics::counter!(
            self.names.parse_errors_total.clone(),
            self.labels.static_metric_labels()
        )
        .increment(1);
    }
}

/// Extract an optional numeric field. Absent or non-numeric values mean the
/// corresponding observation is skipped, not that the line fails.
pub fn optional_float_field(fields: &HashMap<String, String>, name: &str) -> Option<f64> {
    fields.get(name)?.parse::<f64>().ok()
}
