//! Per-namespace processing: binds a namespace's sources to its relabeling
//! schema and metric bundle and runs one worker per source.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::cardinality::TagCardinalityValve;
use crate::config::NamespaceConfig;
use crate::error::{FatalError, Result};
use crate::metrics::{optional_float_field, NamespaceMetrics};
use crate::parser::LineParser;
use crate::relabel::RelabelSchema;
use crate::shutdown::DrainGuard;
use crate::source::{self, FileFollower, LineSource};
use crate::statsd::StatsdClient;

/// Everything a worker needs per line, compiled once at namespace startup
/// and shared read-only by all of the namespace's workers.
pub struct WorkerContext {
    pub namespace: String,
    parser: LineParser,
    relabel: RelabelSchema,
    metrics: NamespaceMetrics,
    valve: TagCardinalityValve,
    print_log: bool,
}

impl WorkerContext {
    pub fn prepare(
        ns: &NamespaceConfig,
        statsd: Option<Arc<StatsdClient>>,
        valve: TagCardinalityValve,
    ) -> Result<Self> {
        let parser = LineParser::compile(&ns.format)?;
        let relabel = RelabelSchema::compile(&ns.relabel_configs)?;
        let metrics = NamespaceMetrics::new(ns, &relabel, statsd);
        Ok(Self {
            namespace: ns.name.clone(),
            parser,
            relabel,
            metrics,
            valve,
            print_log: ns.print_log,
        })
    }

    /// Handle one line, in fixed order: parse, relabel, assemble the label
    /// vector, check the cardinality valve, then update both metric sinks.
    /// The only non-local outcome is a fatal valve trip.
    pub fn process_line(&self, line: &str) -> std::result::Result<(), FatalError> {
        if self.print_log {
            println!("{}", line);
        }

        let Some(fields) = self.parser.parse(line) else {
            debug!(namespace = %self.namespace, line, "line did not match configured format");
            self.metrics.inc_parse_errors();
            return Ok(());
        };

        let (dynamic_values, dynamic_tags) = self.relabel.map(&fields);
        let schema = self.metrics.label_schema();
        let vector = schema.assemble(dynamic_values);
        let tags = schema.line_tags(dynamic_tags);

        self.valve.observe(&tags)?;

        self.metrics.inc_count(&vector, &tags);
        if let Some(bytes) = optional_float_field(&fields, "body_bytes_sent") {
            self.metrics.add_bytes(&vector, &tags, bytes);
        }
        if let Some(seconds) = optional_float_field(&fields, "upstream_response_time") {
            self.metrics.observe_upstream(&vector, &tags, seconds);
        }
        if let Some(seconds) = optional_float_field(&fields, "request_time") {
            self.metrics.observe_response(&vector, &tags, seconds);
        }
        Ok(())
    }
}

/// Open all of a namespace's sources and spawn one worker per source.
pub async fn start(
    ns: NamespaceConfig,
    statsd: Option<Arc<StatsdClient>>,
    valve: TagCardinalityValve,
    stop: watch::Receiver<bool>,
    guard: DrainGuard,
    fatal: mpsc::UnboundedSender<FatalError>,
) -> Result<()> {
    let ctx = Arc::new(WorkerContext::prepare(&ns, statsd, valve)?);

    let mut sources: Vec<Box<dyn LineSource>> = Vec::new();
    for path in &ns.source_files {
        sources.push(Box::new(FileFollower::open(path).await?));
    }
    if let Some(syslog) = &ns.syslog {
        let channels = source::start_syslog_listener(
            &syslog.listen_address,
            &syslog.tags,
            stop.clone(),
            guard.clone(),
        )
        .await?;
        for channel in channels {
            sources.push(Box::new(channel));
        }
    }

    info!(namespace = %ns.name, workers = sources.len(), "starting namespace workers");
    for src in sources {
        tokio::spawn(run_worker(
            src,
            ctx.clone(),
            stop.clone(),
            guard.clone(),
            fatal.clone(),
        ));
    }
    Ok(())
}

async fn run_worker(
    mut src: Box<dyn LineSource>,
    ctx: Arc<WorkerContext>,
    mut stop: watch::Receiver<bool>,
    guard: DrainGuard,
    fatal: mpsc::UnboundedSender<FatalError>,
) {
    let _guard = guard;
    debug!(namespace = %ctx.namespace, source = src.descriptor(), "worker started");
    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!(namespace = %ctx.namespace, source = src.descriptor(), "worker draining");
                break;
            }
            line = src.next_line() => match line {
                Ok(line) => {
                    if let Err(f) = ctx.process_line(&line) {
                        let _ = fatal.send(f);
                        break;
                    }
                }
                Err(error) => {
                    // a source closing during drain is not a failure
                    if *stop.borrow() {
                        break;
                    }
                    let _ = fatal.send(FatalError::Source {
                        namespace: ctx.namespace.clone(),
                        source: src.descriptor().to_string(),
                        error,
                    });
                    break;
                }
            }
        }
    }
}
