use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{ExporterError, Result};
use crate::relabel::RelabelConfig;

/// nginx "combined" log format, the default grammar when none is configured.
pub const DEFAULT_FORMAT: &str = "$remote_addr - $remote_user [$time_local] \"$request\" $status $body_bytes_sent \"$http_referer\" \"$http_user_agent\" \"$http_x_forwarded_for\"";

/// Ceiling for the process-wide tag set unless overridden in the config file.
pub const DEFAULT_MAX_TAG_CARDINALITY: usize = 400;

fn default_histogram_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_max_tag_cardinality() -> usize {
    DEFAULT_MAX_TAG_CARDINALITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Experimental features (currently the syslog source) must be opted
    /// into explicitly; see `stability_warnings`.
    #[serde(default)]
    pub enable_experimental: bool,

    #[serde(default = "default_max_tag_cardinality")]
    pub max_tag_cardinality: usize,

    pub statsd: Option<StatsdConfig>,

    pub consul: Option<ConsulConfig>,

    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    4040
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
            metrics_endpoint: default_metrics_endpoint(),
        }
    }
}

impl ListenConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|e| {
                ExporterError::Config(format!(
                    "invalid listen address '{}:{}': {}",
                    self.address, self.port, e
                ))
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsdConfig {
    /// host:port of the statsd/DogStatsD agent.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsulConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_consul_address")]
    pub address: String,
    #[serde(default = "default_consul_service_name")]
    pub service_name: String,
    pub service_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_consul_address() -> String {
    "localhost:8500".to_string()
}

fn default_consul_service_name() -> String {
    "accesslog-exporter".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,

    /// Metric name prefix; defaults to the namespace name.
    pub prefix: Option<String>,

    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub source_files: Vec<PathBuf>,

    pub syslog: Option<SyslogConfig>,

    /// Static labels. A BTreeMap keeps label order deterministic by key, so
    /// metric series keep their positional identity across restarts.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub relabel_configs: Vec<RelabelConfig>,

    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,

    /// Echo every consumed line to stdout.
    #[serde(default)]
    pub print_log: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyslogConfig {
    /// Listen address in the form "udp://0.0.0.0:5531".
    pub listen_address: String,
    /// Syslog tags to consume; each tag becomes one line source.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NamespaceConfig {
    pub fn metric_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.name)
    }

    pub fn ordered_label_names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }

    pub fn ordered_label_values(&self) -> Vec<String> {
        self.labels.values().cloned().collect()
    }
}

impl Config {
    pub fn load_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExporterError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Build a single-namespace configuration from command-line flags only,
    /// for running without a config file.
    pub fn from_flags(
        namespace: String,
        format: String,
        files: Vec<PathBuf>,
        listen_port: u16,
        metrics_endpoint: Option<String>,
        statsd_address: Option<String>,
    ) -> Self {
        Self {
            listen: ListenConfig {
                port: listen_port,
                metrics_endpoint: metrics_endpoint
                    .unwrap_or_else(default_metrics_endpoint),
                ..ListenConfig::default()
            },
            enable_experimental: false,
            max_tag_cardinality: DEFAULT_MAX_TAG_CARDINALITY,
            statsd: statsd_address.map(|address| StatsdConfig { address }),
            consul: None,
            namespaces: vec![NamespaceConfig {
                name: namespace,
                prefix: None,
                format,
                source_files: files,
                syslog: None,
                labels: BTreeMap::new(),
                relabel_configs: Vec::new(),
                histogram_buckets: default_histogram_buckets(),
                print_log: false,
            }],
        }
    }

    /// Returns a description of any configured feature that is still
    /// explicitly labeled as experimental, or None when the configuration is
    /// stable. Callers veto startup unless `enable_experimental` is set.
    pub fn stability_warnings(&self) -> Option<String> {
        for ns in &self.namespaces {
            if ns.syslog.is_some() {
                return Some(format!(
                    "namespace '{}' uses a syslog source, which is an experimental feature",
                    ns.name
                ));
            }
        }
        None
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespaces.is_empty() {
            return Err(ExporterError::Config(
                "no namespaces configured".to_string(),
            ));
        }
        for ns in &self.namespaces {
            if ns.name.is_empty() {
                return Err(ExporterError::Config(
                    "namespace with empty name".to_string(),
                ));
            }
            let syslog_tags = ns
                .syslog
                .as_ref()
                .map(|s| s.tags.len())
                .unwrap_or_default();
            if ns.source_files.is_empty() && syslog_tags == 0 {
                return Err(ExporterError::Config(format!(
                    "namespace '{}' has no log sources",
                    ns.name
                )));
            }
            if ns.histogram_buckets.is_empty() {
                return Err(ExporterError::Config(format!(
                    "namespace '{}' has empty histogram buckets",
                    ns.name
                )));
            }
        }
        Ok(())
    }
}
