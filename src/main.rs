use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use accesslog_exporter::cardinality::TagCardinalityValve;
use accesslog_exporter::config::{Config, DEFAULT_FORMAT};
use accesslog_exporter::discovery::ConsulRegistrator;
use accesslog_exporter::error::FatalError;
use accesslog_exporter::shutdown::ShutdownCoordinator;
use accesslog_exporter::statsd::StatsdClient;
use accesslog_exporter::{logging, metrics, namespace, server, shutdown};

#[derive(Parser)]
#[command(name = "accesslog-exporter")]
#[command(about = "Aggregates web-server access logs into Prometheus and statsd metrics")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file to read from
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// HTTP port to listen on (flag-only mode)
    #[arg(long, default_value_t = 4040)]
    listen_port: u16,

    /// Access log format (flag-only mode)
    #[arg(long, default_value = DEFAULT_FORMAT)]
    format: String,

    /// Namespace to use for metric names (flag-only mode)
    #[arg(long, default_value = "nginx")]
    namespace: String,

    /// URL path at which to serve metrics
    #[arg(long)]
    metrics_endpoint: Option<String>,

    /// host:port of a statsd agent to mirror metrics to
    #[arg(long)]
    statsd_address: Option<String>,

    /// Enable features explicitly labeled as experimental
    #[arg(long)]
    enable_experimental: bool,

    /// Access log files to tail (flag-only mode)
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let mut cfg = match &cli.config_file {
        Some(path) => {
            info!("loading configuration file {}", path.display());
            Config::load_file(path)?
        }
        None => Config::from_flags(
            cli.namespace.clone(),
            cli.format.clone(),
            cli.files.clone(),
            cli.listen_port,
            cli.metrics_endpoint.clone(),
            cli.statsd_address.clone(),
        ),
    };
    if cli.enable_experimental {
        cfg.enable_experimental = true;
    }

    if let Some(warning) = cfg.stability_warnings() {
        if !cfg.enable_experimental {
            eprintln!(
                "Your configuration contains an option that is explicitly labeled as an experimental feature:\n\n  {}\n",
                warning
            );
            eprintln!("Use the --enable-experimental flag or the enable_experimental option to enable these features. Use them at your own peril.");
            // a stability veto is a refusal to start, not a failure
            return Ok(());
        }
    }
    cfg.validate()?;

    let endpoint = cfg.listen.metrics_endpoint.clone();
    if !endpoint.starts_with('/') {
        return Err(anyhow!("metrics endpoint '{}' must start with '/'", endpoint));
    }
    let listen_addr = cfg.listen.socket_addr()?;

    let handle = metrics::install_recorder(&cfg)?;

    let statsd = match &cfg.statsd {
        Some(statsd_cfg) => {
            info!("mirroring metrics to statsd at {}", statsd_cfg.address);
            Some(Arc::new(
                StatsdClient::connect(&statsd_cfg.address)
                    .context("failed to connect to statsd")?,
            ))
        }
        None => None,
    };

    let coordinator = ShutdownCoordinator::new();
    let valve = TagCardinalityValve::new(cfg.max_tag_cardinality);
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

    if let Some(consul) = cfg.consul.as_ref().filter(|c| c.enable) {
        let registrator = ConsulRegistrator::from_config(consul, &cfg.listen)?;
        info!(
            "registering service '{}' in consul at {}",
            registrator.service_id(),
            consul.address
        );
        registrator
            .register()
            .await
            .context("consul registration failed")?;

        let mut stop = coordinator.subscribe();
        let guard = coordinator.drain_guard();
        tokio::spawn(async move {
            let _guard = guard;
            let _ = stop.changed().await;
            info!("deregistering service from consul");
            if let Err(e) = registrator.deregister().await {
                warn!("error while deregistering from consul: {}", e);
            }
        });
    }

    for ns in cfg.namespaces.clone() {
        let statsd = statsd.clone();
        let valve = valve.clone();
        let stop = coordinator.subscribe();
        let guard = coordinator.drain_guard();
        let fatal = fatal_tx.clone();
        info!("starting listener for namespace {}", ns.name);
        tokio::spawn(async move {
            let name = ns.name.clone();
            if let Err(error) = namespace::start(ns, statsd, valve, stop, guard, fatal.clone()).await
            {
                let _ = fatal.send(FatalError::NamespaceStartup {
                    namespace: name,
                    error,
                });
            }
        });
    }

    let listener = std::net::TcpListener::bind(listen_addr)
        .with_context(|| format!("cannot bind HTTP server on {}", listen_addr))?;
    listener.set_nonblocking(true)?;
    let app = server::router(&endpoint, handle);
    let http = axum::Server::from_tcp(listener)
        .map_err(|e| anyhow!("error while starting HTTP server: {}", e))?
        .serve(app.into_make_service());
    let mut http_task = tokio::spawn(http);
    info!(
        "running HTTP server on address {}, serving metrics at {}",
        listen_addr, endpoint
    );

    tokio::select! {
        _ = shutdown::wait_for_signal() => {
            info!("caught termination signal, draining");
            coordinator.shutdown().await;
            info!("all shutdown handlers finished, exiting");
            Ok(())
        }
        Some(fatal) = fatal_rx.recv() => match fatal {
            FatalError::TagCardinality { count, ceiling, tags } => {
                error!(
                    count,
                    ceiling,
                    "too many distinct metric tags; stopping before the monitoring backend degrades"
                );
                error!("observed tag set: {}", tags.join(", "));
                std::process::exit(0);
            }
            FatalError::Source { namespace, source, error } => {
                error!(%namespace, %source, "unrecoverable source failure: {}", error);
                Err(anyhow!(
                    "source '{}' in namespace '{}' failed: {}",
                    source,
                    namespace,
                    error
                ))
            }
            FatalError::NamespaceStartup { namespace, error } => {
                error!(%namespace, "namespace failed to start: {}", error);
                Err(anyhow!("namespace '{}' failed to start: {}", namespace, error))
            }
        },
        result = &mut http_task => {
            let message = match result {
                Ok(Err(e)) => format!("HTTP server terminated: {}", e),
                Ok(Ok(())) => "HTTP server terminated unexpectedly".to_string(),
                Err(e) => format!("HTTP server task failed: {}", e),
            };
            Err(anyhow!(message))
        }
    }
}
