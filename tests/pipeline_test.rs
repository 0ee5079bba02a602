//! End-to-end tests of the per-line pipeline: parse, relabel, label-vector
//! assembly, cardinality valve, and metric aggregation, asserted against the
//! rendered Prometheus exposition of a locally installed recorder.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;

use accesslog_exporter::cardinality::TagCardinalityValve;
use accesslog_exporter::config::NamespaceConfig;
use accesslog_exporter::namespace::WorkerContext;
use accesslog_exporter::parser::LineParser;
use accesslog_exporter::relabel::RelabelSchema;

fn test_namespace(name: &str, format: &str) -> NamespaceConfig {
    let mut labels = BTreeMap::new();
    labels.insert("service".to_string(), name.to_string());
    NamespaceConfig {
        name: name.to_string(),
        prefix: None,
        format: format.to_string(),
        source_files: vec!["access.log".into()],
        syslog: None,
        labels,
        relabel_configs: Vec::new(),
        histogram_buckets: vec![0.1, 1.0, 10.0],
        print_log: false,
    }
}

fn context(ns: &NamespaceConfig, valve: TagCardinalityValve) -> WorkerContext {
    WorkerContext::prepare(ns, None, valve).expect("namespace context")
}

/// Find one series in the exposition text by metric name and a label
/// fragment, returning its value.
fn series_value(rendered: &str, metric: &str, label_fragment: &str) -> Option<f64> {
    rendered.lines().find_map(|line| {
        let rest = line.strip_prefix(metric)?;
        if !rest.starts_with('{') && !rest.starts_with(' ') {
            return None;
        }
        if !line.contains(label_fragment) {
            return None;
        }
        line.rsplit(' ').next()?.parse().ok()
    })
}

#[test]
fn counts_and_bytes_for_parsed_line() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("app1", "$status $body_bytes_sent");
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("200 512").unwrap();
    });

    let rendered = handle.render();
    assert_eq!(
        series_value(&rendered, "app1_http_response_count_total", "status=\"200\""),
        Some(1.0)
    );
    assert_eq!(
        series_value(&rendered, "app1_http_response_size_bytes", "status=\"200\""),
        Some(512.0)
    );
    // static label rides along on every series
    assert_eq!(
        series_value(&rendered, "app1_http_response_count_total", "service=\"app1\""),
        Some(1.0)
    );
}

#[test]
fn missing_relabel_source_yields_empty_label_value() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    // no $request field in the format, so the default method rule has no source
    let ns = test_namespace("app2", "$status $body_bytes_sent");
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("404 0").unwrap();
    });

    let rendered = handle.render();
    // vector length is fixed: method is the empty string, status still set
    assert_eq!(
        series_value(&rendered, "app2_http_response_count_total", "method=\"\""),
        Some(1.0)
    );
    assert_eq!(
        series_value(&rendered, "app2_http_response_count_total", "status=\"404\""),
        Some(1.0)
    );
}

#[test]
fn status_group_tag_is_derived_for_unusual_status() {
    let ns = test_namespace("app3", "$status $body_bytes_sent");
    let parser = LineParser::compile(&ns.format).unwrap();
    let schema = RelabelSchema::compile(&ns.relabel_configs).unwrap();

    let fields = parser.parse("599 512").unwrap();
    let (_, tags) = schema.map(&fields);
    assert!(tags.contains(&"status:599".to_string()));
    assert!(tags.contains(&"status_group:5xx".to_string()));
}

#[test]
fn malformed_line_only_increments_parse_errors() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace(
        "app4",
        "$remote_addr - $remote_user [$time_local] \"$request\"",
    );
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("garbage").unwrap();
    });

    let rendered = handle.render();
    assert_eq!(
        series_value(&rendered, "app4_parse_errors_total", ""),
        Some(1.0)
    );
    assert!(!rendered.contains("app4_http_response_count_total"));
    assert!(!rendered.contains("app4_http_response_size_bytes"));
}

#[test]
fn non_numeric_duration_skips_only_that_observation() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("app5", "$status $request_time");
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("200 abc").unwrap();
    });

    let rendered = handle.render();
    // count is never optional
    assert_eq!(
        series_value(&rendered, "app5_http_response_count_total", "status=\"200\""),
        Some(1.0)
    );
    // the malformed request_time produced no duration sample
    assert!(!rendered.contains("app5_http_response_time_seconds"));
}

#[test]
fn replaying_a_line_produces_identical_deltas() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("app6", "$status $body_bytes_sent");
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("200 100").unwrap();
    });
    let first = series_value(
        &handle.render(),
        "app6_http_response_size_bytes",
        "status=\"200\"",
    )
    .unwrap();

    metrics::with_local_recorder(&recorder, || {
        ctx.process_line("200 100").unwrap();
    });
    let second = series_value(
        &handle.render(),
        "app6_http_response_size_bytes",
        "status=\"200\"",
    )
    .unwrap();

    assert_eq!(first, 100.0);
    assert_eq!(second - first, first);
}

#[test]
fn cardinality_trip_stops_metric_emission() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("app7", "$status $body_bytes_sent");
    // base tags alone (service, hostname, ip) are enough to reach this ceiling
    let ctx = context(&ns, TagCardinalityValve::new(2));

    metrics::with_local_recorder(&recorder, || {
        assert!(ctx.process_line("200 512").is_err());
    });

    // the valve runs before aggregation, so nothing was emitted
    let rendered = handle.render();
    assert!(!rendered.contains("app7_http_response_count_total"));
}

#[test]
fn processing_below_ceiling_is_unaffected() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("app8", "$status $body_bytes_sent");
    let ctx = context(&ns, TagCardinalityValve::new(400));

    metrics::with_local_recorder(&recorder, || {
        for status in ["200", "301", "404", "500"] {
            ctx.process_line(&format!("{} 10", status)).unwrap();
        }
    });

    let rendered = handle.render();
    for status in ["200", "301", "404", "500"] {
        let fragment = format!("status=\"{}\"", status);
        assert_eq!(
            series_value(&rendered, "app8_http_response_count_total", &fragment),
            Some(1.0)
        );
    }
}

#[test]
fn concurrent_workers_lose_no_updates() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let ns = test_namespace("conc", "$status $body_bytes_sent");
    let ctx = Arc::new(context(&ns, TagCardinalityValve::new(400)));

    std::thread::scope(|scope| {
        for _ in 0..2 {
            let ctx = Arc::clone(&ctx);
            let recorder = &recorder;
            scope.spawn(move || {
                metrics::with_local_recorder(recorder, || {
                    for _ in 0..500 {
                        ctx.process_line("200 64").unwrap();
                    }
                });
            });
        }
    });

    let rendered = handle.render();
    assert_eq!(
        series_value(&rendered, "conc_http_response_count_total", "status=\"200\""),
        Some(1000.0)
    );
    assert_eq!(
        series_value(&rendered, "conc_http_response_size_bytes", "status=\"200\""),
        Some(64.0 * 1000.0)
    );
}
